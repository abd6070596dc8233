// Protocol constants for Niimbot label printers

use std::time::Duration;

/// Two-byte frame start marker
pub const FRAME_HEAD: [u8; 2] = [0x55, 0x55];

/// Two-byte frame end marker
pub const FRAME_TAIL: [u8; 2] = [0xAA, 0xAA];

/// Head (2) + type (1) + length (1)
pub const FRAME_HEADER_SIZE: usize = 4;

/// Checksum (1) + tail (2)
pub const FRAME_TRAILER_SIZE: usize = 3;

/// Smallest possible frame: empty payload
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Payload length must stay strictly below this
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Response type the device uses to report an error
pub const ERROR_RESPONSE_TYPE: u8 = 219;

/// Response type the device uses for an unrecognised request
pub const INVALID_RESPONSE_TYPE: u8 = 0;

/// Maximum number of bitmap rows sent in one batch (device buffer limit)
pub const SLICE_ROWS: usize = 200;

/// Width of one column group in the image row header
pub const PIXELS_PER_GROUP: usize = 32;

/// Default write chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 150;

/// Default window for a command response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between END_PAGE attempts and print status polls
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_millis(200);

/// Cadence of the telemetry heartbeat
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// END_PAGE attempts before giving up (~10 s at the default backoff)
pub const DEFAULT_MAX_END_PAGE_ATTEMPTS: u32 = 50;

/// Print status polls before giving up (~5 min at the default backoff)
pub const DEFAULT_MAX_STATUS_POLLS: u32 = 1500;

/// Printer resolution
pub const PRINTER_DPI: u32 = 203;

/// Default response offset: most commands answer with `request + 1`
pub const DEFAULT_RESPONSE_OFFSET: u8 = 1;

/// Response offset used by label type, clear, dimension and print status
pub const EXTENDED_RESPONSE_OFFSET: u8 = 16;

/// Sentinel reported for telemetry fields a response does not carry
pub const UNKNOWN_FIELD: i16 = -1;
