//! The wireless channel the engine talks through.
//!
//! Scanning, pairing and the radio itself live outside this crate; an adapter
//! only has to expose the handful of primitives below.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Raw notification payloads, in arrival order.
pub type Notifications = mpsc::UnboundedReceiver<Bytes>;

#[async_trait]
pub trait Link: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Write one chunk, never longer than [`Link::max_writable_chunk_size`].
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Start a fresh notification stream. A previous stream stops receiving.
    async fn subscribe_notifications(&mut self) -> Result<Notifications>;

    fn max_writable_chunk_size(&self) -> usize;

    async fn disconnect(&mut self) -> Result<()>;

    /// Advertised device name, e.g. `B21-C2090123`.
    fn device_name(&self) -> Option<String> {
        None
    }
}
