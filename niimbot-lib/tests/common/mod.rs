//! Fixtures and imports shared by the integration tests

#![allow(unused_imports, dead_code)]

pub use bytes::Bytes;
pub use hex;
pub use niimbot_lib::bitmap::Bitmap;
pub use niimbot_lib::config::{RetryPolicy, SessionConfig, TransceiverConfig};
pub use niimbot_lib::encoder::{ImageBatch, encode_image, encode_rows};
pub use niimbot_lib::error::NiimError;
pub use niimbot_lib::packet::{ChecksumMode, CommandType, FrameAssembler, Packet};
pub use niimbot_lib::queue::BoxFuture;
pub use niimbot_lib::sim::{Reply, SimHandle, SimulatedPrinter, default_heartbeat, default_rfid};
pub use niimbot_lib::transceiver::Transceiver;
pub use std::time::Duration;

/// Wire bytes written as a hex string
pub fn hex_to_bytes(frame: &str) -> Bytes {
    Bytes::from(hex::decode(frame).expect("fixture is valid hex"))
}

/// Route library logs to the test output; `RUST_LOG=debug` shows TX/RX frames
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transceiver over a simulator with default settings
pub fn sim_transceiver(sim: SimulatedPrinter) -> (Transceiver<SimulatedPrinter>, SimHandle) {
    init_tracing();
    let handle = sim.handle();
    (Transceiver::new(sim, TransceiverConfig::default()), handle)
}

/// Short backoff and low caps so failing loops finish quickly
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::from_millis(10),
        max_end_page_attempts: 5,
        max_status_polls: 20,
    }
}

/// Bitmap with a single inked row at `y`
pub fn one_line_bitmap(width: usize, height: usize, y: usize) -> Bitmap {
    let mut bitmap = Bitmap::blank(width, height).expect("valid size");
    for x in 0..width {
        bitmap.set_pixel(x, y, true);
    }
    bitmap
}

/// Tag payload: 8-byte uuid, barcode, serial, total, used, type
pub fn rfid_payload(
    barcode: &[u8],
    serial: &[u8],
    total: u16,
    used: u16,
    roll_type: u8,
) -> Vec<u8> {
    let mut payload = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
    payload.push(barcode.len() as u8);
    payload.extend_from_slice(barcode);
    payload.push(serial.len() as u8);
    payload.extend_from_slice(serial);
    payload.extend_from_slice(&total.to_be_bytes());
    payload.extend_from_slice(&used.to_be_bytes());
    payload.push(roll_type);
    payload
}
