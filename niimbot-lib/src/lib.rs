pub mod bitmap;
pub mod config;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod link;
pub mod model;
pub mod packet;
pub mod printer;
pub mod queue;
pub mod session;
pub mod sim;
pub mod telemetry;
pub mod transceiver;


// Re-export the types most callers need
pub use bitmap::Bitmap;
pub use config::{RetryPolicy, SessionConfig, TransceiverConfig};
pub use error::{NiimError, Result};
pub use link::Link;
pub use packet::{CommandType, Packet};
pub use printer::{PrintJob, PrintStep};
pub use session::{PrinterSession, SessionPhase, SessionState};
pub use transceiver::Transceiver;
