use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_END_PAGE_ATTEMPTS,
    DEFAULT_MAX_STATUS_POLLS, DEFAULT_POLL_BACKOFF, DEFAULT_RESPONSE_TIMEOUT,
};
use crate::error::{NiimError, Result};
use crate::packet::ChecksumMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the request/response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverConfig {
    /// Upper bound on one write; the link's own limit still applies
    pub chunk_size: usize,
    pub response_timeout: Duration,
    pub checksum_mode: ChecksumMode,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            checksum_mode: ChecksumMode::Validate,
        }
    }
}

/// Bounds on the two polling loops of a print job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_end_page_attempts: u32,
    pub max_status_polls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_POLL_BACKOFF,
            max_end_page_attempts: DEFAULT_MAX_END_PAGE_ATTEMPTS,
            max_status_polls: DEFAULT_MAX_STATUS_POLLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transceiver: TransceiverConfig,
    pub retry: RetryPolicy,
    pub heartbeat_interval: Duration,
    pub poll_heartbeat: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transceiver: TransceiverConfig::default(),
            retry: RetryPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_heartbeat: true,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.transceiver.chunk_size = chunk_size;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.transceiver.response_timeout = timeout;
        self
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.transceiver.checksum_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Do not start the background heartbeat.
    pub fn without_heartbeat(mut self) -> Self {
        self.poll_heartbeat = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.transceiver.chunk_size == 0 {
            return Err(NiimError::InvalidChunkSize(0));
        }
        if self.heartbeat_interval.is_zero() && self.poll_heartbeat {
            return Err(NiimError::Config("heartbeat interval must be non-zero".to_string()));
        }
        if self.retry.max_end_page_attempts == 0 {
            return Err(NiimError::Config("END_PAGE attempt cap must be at least 1".to_string()));
        }
        if self.retry.max_status_polls == 0 {
            return Err(NiimError::Config("status poll cap must be at least 1".to_string()));
        }
        Ok(())
    }
}
