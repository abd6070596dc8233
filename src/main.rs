use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use niimbot_lib::encoder::encode_image;
use niimbot_lib::model::{Density, Product};
use niimbot_lib::packet::ChecksumMode;
use niimbot_lib::sim::SimulatedPrinter;
use niimbot_lib::{Bitmap, Packet, PrintJob, PrinterSession, SessionConfig};

mod raster;

/// Tooling for the Niimbot label printer protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Also write logs to this file.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode an image file (PNG, PBM, ...) into image packets and print a summary.
    Encode {
        image: PathBuf,
        /// Print every packet as hex.
        #[arg(long)]
        dump: bool,
    },
    /// Decode one hex-encoded frame.
    Decode {
        hex: String,
        /// Accept frames whose checksum does not match.
        #[arg(long)]
        skip_checksum: bool,
    },
    /// Print an image file on the simulated printer and show the final session state.
    Simulate {
        image: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        quantity: u16,
        /// Print darkness, 1 to 5.
        #[arg(short, long, default_value_t = 3)]
        density: u8,
        /// Session configuration as JSON.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Advertised name of the simulated printer; the prefix picks the model.
        #[arg(short, long, default_value = "B21-SIM00001")]
        name: String,
    },
}

/// Console logs go to stderr so stdout stays clean for command output.
fn init_logging(
    log_file: Option<&Path>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    // -v shows TX/RX frames, -vv the trace-level skips
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let mut guard = None;
    let file = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Cannot create log file {}", path.display()))?;
            let (writer, file_guard) = tracing_appender::non_blocking(file);
            guard = Some(file_guard);
            Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry().with(filter).with(stderr).with(file).init();
    if let Some(path) = log_file {
        debug!(path = %path.display(), "Mirroring logs to file");
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref(), &cli.verbose)?;

    let outcome = match cli.command {
        Command::Encode { image, dump } => run_encode(image, dump),
        Command::Decode { hex, skip_checksum } => run_decode(&hex, skip_checksum),
        Command::Simulate {
            image,
            quantity,
            density,
            config,
            name,
        } => run_simulate(image, quantity, density, config, name).await,
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}

fn run_encode(image: PathBuf, dump: bool) -> Result<()> {
    let bitmap = raster::load(&image)?;
    let batches = encode_image(&bitmap)?;

    println!(
        "{}x{} px, {} ink pixels, {} batches",
        bitmap.width(),
        bitmap.height(),
        bitmap.ink_count(),
        batches.len()
    );
    for batch in &batches {
        println!(
            "  rows {:>5}..{:<5} {:>3} packets {:>6} bytes",
            batch.y_start(),
            batch.y_start() + batch.rows(),
            batch.len(),
            batch.to_bytes().len()
        );
        if dump {
            for packet in batch.packets() {
                println!("    {:?} {}", packet.command(), hex::encode(packet.encode()));
            }
        }
    }
    Ok(())
}

fn run_decode(hex_frame: &str, skip_checksum: bool) -> Result<()> {
    let cleaned: String = hex_frame.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = Bytes::from(hex::decode(&cleaned).context("Frame is not valid hex")?);

    let packet = if skip_checksum {
        Packet::decode(&bytes, ChecksumMode::Skip)?
    } else {
        Packet::try_from(bytes)?
    };

    println!("{}", packet);
    println!("  command: {:?}", packet.command());
    println!("  as int:  {}", packet.as_int());
    println!("  as bool: {}", packet.as_bool());
    if packet.is_error() {
        warn!("Frame carries the device error sentinel");
    } else if packet.is_invalid() {
        warn!("Frame carries the invalid request sentinel");
    }
    Ok(())
}

async fn run_simulate(
    image: PathBuf,
    quantity: u16,
    density: u8,
    config: Option<PathBuf>,
    name: String,
) -> Result<()> {
    let config = match config {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            SessionConfig::from_json(&json).with_context(|| format!("Invalid config: {:?}", path))?
        }
        None => SessionConfig::default(),
    };
    let density = Density::try_from(density)
        .map_err(|_| anyhow::anyhow!("Density must be 1 to 5, got {}", density))?;

    let product = Product::from_device_name(&name);
    let bitmap = fit_to_product(raster::load(&image)?, product)?;
    let job = PrintJob::from_bitmap(&bitmap)?
        .with_density(density)
        .with_quantity(quantity);

    let printer = SimulatedPrinter::new().with_name(name);
    let sim = printer.handle();
    let session = PrinterSession::open(printer, config)
        .await
        .context("Failed to open session")?;

    info!(%product, width = bitmap.width(), height = bitmap.height(), "Printing");
    let result = session.print(job).await;

    println!("{}", serde_json::to_string_pretty(&session.state())?);
    info!(packets = sim.received().len(), "Simulated printer received");
    session.disconnect().await?;
    result.context("Print failed")
}

/// Rotate for sideways-feeding models and warn when the image is wider than the head.
fn fit_to_product(bitmap: Bitmap, product: Product) -> Result<Bitmap> {
    let bitmap = if product.prints_vertically() {
        bitmap
            .rotated_clockwise()
            .context("Rotated image height must be a multiple of 8")?
    } else {
        bitmap
    };
    let head = product.effective_print_width_px();
    if bitmap.width() > head {
        warn!(width = bitmap.width(), head, %product, "Image is wider than the print head");
    }
    Ok(bitmap)
}
