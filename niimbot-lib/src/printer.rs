//! Print job orchestration.
//!
//! A job walks a fixed command sequence. Every step must be acknowledged;
//! the first failure aborts the job. Only `END_PAGE` and the completion poll
//! repeat, both bounded by [`RetryPolicy`].

use crate::bitmap::Bitmap;
use crate::config::RetryPolicy;
use crate::encoder::{ImageBatch, encode_image};
use crate::error::{NiimError, Result};
use crate::link::Link;
use crate::model::Density;
use crate::packet::CommandType;
use crate::telemetry::PrintJobStatus;
use crate::transceiver::Transceiver;
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Steps of a print job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum PrintStep {
    #[strum(to_string = "setting label type")]
    SetLabelType,
    #[strum(to_string = "setting label density")]
    SetDensity,
    #[strum(to_string = "starting print")]
    StartPrint,
    #[strum(to_string = "setting print clear")]
    AllowClear,
    #[strum(to_string = "starting page")]
    StartPage,
    #[strum(to_string = "setting dimensions")]
    SetDimensions,
    #[strum(to_string = "setting quantity")]
    SetQuantity,
    #[strum(to_string = "sending image data")]
    SendImage,
    #[strum(to_string = "ending page")]
    EndPage,
    #[strum(to_string = "waiting for the printer to finish")]
    AwaitCompletion,
    #[strum(to_string = "ending print")]
    EndPrint,
}

/// Everything the printer needs for one print.
#[derive(Debug, Clone)]
pub struct PrintJob {
    batches: Vec<ImageBatch>,
    width_px: u16,
    height_px: u16,
    density: Density,
    quantity: u16,
    label_type: u8,
}

impl PrintJob {
    pub fn new(batches: Vec<ImageBatch>, width_px: u16, height_px: u16) -> Result<Self> {
        if batches.is_empty() {
            return Err(NiimError::InvalidJob("no image data".to_string()));
        }
        Ok(Self {
            batches,
            width_px,
            height_px,
            density: Density::default(),
            quantity: 1,
            label_type: 1,
        })
    }

    /// Encode `bitmap` and size the job after it.
    pub fn from_bitmap(bitmap: &Bitmap) -> Result<Self> {
        let dimension = |name: &str, value: usize| {
            u16::try_from(value)
                .map_err(|_| NiimError::InvalidJob(format!("{} {} out of range", name, value)))
        };
        let width = dimension("width", bitmap.width())?;
        let height = dimension("height", bitmap.height())?;
        Self::new(encode_image(bitmap)?, width, height)
    }

    pub fn with_density(mut self, density: Density) -> Self {
        self.density = density;
        self
    }

    pub fn with_quantity(mut self, quantity: u16) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_label_type(mut self, label_type: u8) -> Self {
        self.label_type = label_type;
        self
    }

    pub fn batches(&self) -> &[ImageBatch] {
        &self.batches
    }

    pub fn width_px(&self) -> u16 {
        self.width_px
    }

    pub fn height_px(&self) -> u16 {
        self.height_px
    }

    pub fn density(&self) -> Density {
        self.density
    }

    pub fn quantity(&self) -> u16 {
        self.quantity
    }

    pub fn label_type(&self) -> u8 {
        self.label_type
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(NiimError::InvalidJob("quantity must be at least 1".to_string()));
        }
        if self.batches.is_empty() {
            return Err(NiimError::InvalidJob("no image data".to_string()));
        }
        Ok(())
    }
}

/// Run `job` to completion over `transceiver`.
///
/// `on_status` sees every progress reading while the printer works, then
/// `None` once it reports no active job.
pub async fn run_print_job<L, F>(
    transceiver: &mut Transceiver<L>,
    job: &PrintJob,
    retry: &RetryPolicy,
    mut on_status: F,
) -> Result<()>
where
    L: Link,
    F: FnMut(Option<PrintJobStatus>) + Send,
{
    job.validate()?;
    info!(
        width = job.width_px,
        height = job.height_px,
        batches = job.batches.len(),
        quantity = job.quantity,
        "Starting print job"
    );

    let density = job.density.value();
    let [w_hi, w_lo] = job.width_px.to_be_bytes();
    let [h_hi, h_lo] = job.height_px.to_be_bytes();
    let setup = [
        (PrintStep::SetLabelType, CommandType::SetLabelType, vec![job.label_type]),
        (PrintStep::SetDensity, CommandType::SetLabelDensity, vec![density]),
        (PrintStep::StartPrint, CommandType::StartPrint, vec![0x01]),
        (PrintStep::AllowClear, CommandType::AllowClear, vec![density]),
        (PrintStep::StartPage, CommandType::StartPage, vec![0x01]),
        (PrintStep::SetDimensions, CommandType::SetDimension, vec![w_hi, w_lo, h_hi, h_lo]),
        (PrintStep::SetQuantity, CommandType::SetQuantity, job.quantity.to_be_bytes().to_vec()),
    ];
    for (step, cmd, values) in setup {
        debug!(%step, "Print step");
        transceiver.set_mode(cmd, &values).await.map_err(|e| e.at_step(step))?;
    }

    let timeout = transceiver.config().response_timeout;
    for (index, batch) in job.batches.iter().enumerate() {
        transceiver
            .transceive_raw(&batch.to_bytes(), CommandType::ImageReceived.code(), timeout)
            .await
            .map_err(|e| e.at_step(PrintStep::SendImage))?;
        debug!(index, y = batch.y_start(), packets = batch.len(), "Batch acknowledged");
    }

    end_page(transceiver, retry).await?;
    await_completion(transceiver, retry, &mut on_status).await?;

    transceiver
        .set_mode(CommandType::EndPrint, &[0x01])
        .await
        .map_err(|e| e.at_step(PrintStep::EndPrint))?;
    info!("Print job finished");
    Ok(())
}

async fn end_page<L: Link>(transceiver: &mut Transceiver<L>, retry: &RetryPolicy) -> Result<()> {
    for attempt in 1..=retry.max_end_page_attempts {
        match transceiver.set_mode(CommandType::EndPage, &[0x01]).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "END_PAGE not acknowledged yet");
                tokio::time::sleep(retry.backoff).await;
            }
        }
    }
    Err(NiimError::GaveUp {
        step: PrintStep::EndPage,
        attempts: retry.max_end_page_attempts,
    })
}

/// The printer stops answering the status request once the job is done;
/// that absence is the completion signal.
async fn await_completion<L, F>(
    transceiver: &mut Transceiver<L>,
    retry: &RetryPolicy,
    on_status: &mut F,
) -> Result<()>
where
    L: Link,
    F: FnMut(Option<PrintJobStatus>) + Send,
{
    for _ in 0..retry.max_status_polls {
        match transceiver.print_status().await {
            Ok(status) => {
                debug!(page = status.page, progress = ?status.progress, "Print status");
                on_status(Some(status));
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => {
                debug!(error = %e, "No active print job");
                on_status(None);
                return Ok(());
            }
        }
    }
    Err(NiimError::GaveUp {
        step: PrintStep::AwaitCompletion,
        attempts: retry.max_status_polls,
    })
}
