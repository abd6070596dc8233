use crate::printer::PrintStep;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `niimbot-lib` library.
#[derive(Error, Debug)]
pub enum NiimError {
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Payload too large: {0} bytes (must be below 255)")]
    PayloadTooLarge(usize),

    #[error("No matching response within {0:?}")]
    Timeout(Duration),

    #[error("Link disconnected")]
    LinkDisconnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Device reported an error")]
    DeviceError,

    #[error("Device returned an invalid response")]
    InvalidResponse,

    #[error("Device rejected command {0:#04x}")]
    Rejected(u8),

    #[error("Previous print job is still in progress")]
    AlreadyPrinting,

    #[error("Failed {step}: {source}")]
    JobStepFailed {
        step: PrintStep,
        #[source]
        source: Box<NiimError>,
    },

    #[error("Gave up {step} after {attempts} attempts")]
    GaveUp { step: PrintStep, attempts: u32 },

    #[error("Invalid bitmap: {0}")]
    InvalidBitmap(String),

    #[error("Invalid print job: {0}")]
    InvalidJob(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("Execution queue is shut down")]
    QueueClosed,

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
}

impl NiimError {
    /// Wrap an error as the failure of a print job step.
    pub fn at_step(self, step: PrintStep) -> Self {
        NiimError::JobStepFailed {
            step,
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = NiimError> = std::result::Result<T, E>;
