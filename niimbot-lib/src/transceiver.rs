use crate::config::TransceiverConfig;
use crate::error::{NiimError, Result};
use crate::link::{Link, Notifications};
use crate::packet::{CommandType, FrameAssembler, Packet};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Owns the link for the duration of one exchange at a time.
///
/// Not reentrant: only the task currently running on the
/// [`ExecutionQueue`](crate::queue::ExecutionQueue) may hold it.
pub struct Transceiver<L: Link> {
    link: L,
    config: TransceiverConfig,
    notifications: Option<Notifications>,
    assembler: FrameAssembler,
}

impl<L: Link> Transceiver<L> {
    pub fn new(link: L, config: TransceiverConfig) -> Self {
        Self {
            link,
            config,
            notifications: None,
            assembler: FrameAssembler::new(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &TransceiverConfig {
        &self.config
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Reconnect once if the link dropped; no further retries.
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.link.is_connected().await {
            return Ok(());
        }
        info!("Link not connected, reconnecting...");
        self.link.connect().await?;
        if !self.link.is_connected().await {
            return Err(NiimError::LinkDisconnected);
        }
        // a stream from the old connection will never deliver again
        self.notifications = None;
        self.assembler.clear();
        Ok(())
    }

    /// Write `data` in chunks no longer than `chunk_size` or the link limit.
    pub async fn send_chunked(&mut self, data: &[u8], chunk_size: usize) -> Result<()> {
        if data.is_empty() {
            return Err(NiimError::WriteFailed("nothing to send".to_string()));
        }
        let limit = chunk_size.min(self.link.max_writable_chunk_size());
        if limit == 0 {
            return Err(NiimError::InvalidChunkSize(limit));
        }

        self.ensure_connected().await?;
        for chunk in data.chunks(limit) {
            debug!(bytes = hex::encode(chunk), "TX");
            self.link.write_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Replace the notification stream and forget any partial frame.
    pub async fn subscribe(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.notifications = Some(self.link.subscribe_notifications().await?);
        self.assembler.clear();
        Ok(())
    }

    /// Wait for the next well-formed packet.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Packet> {
        self.receive_until(Instant::now() + timeout, timeout).await
    }

    async fn receive_until(&mut self, deadline: Instant, window: Duration) -> Result<Packet> {
        if self.notifications.is_none() {
            self.subscribe().await?;
        }

        loop {
            while let Some(frame) = self.assembler.next_frame() {
                match Packet::decode(&frame, self.config.checksum_mode) {
                    Ok(packet) => {
                        debug!(bytes = hex::encode(&frame), "RX");
                        return Ok(packet);
                    }
                    Err(e) => {
                        warn!(error = %e, bytes = hex::encode(&frame), "Discarding garbled frame")
                    }
                }
            }

            let Some(rx) = self.notifications.as_mut() else {
                return Err(NiimError::LinkDisconnected);
            };
            let next = timeout_at(deadline, rx.recv()).await;
            match next {
                Err(_) => return Err(NiimError::Timeout(window)),
                Ok(None) => {
                    self.notifications = None;
                    return Err(NiimError::LinkDisconnected);
                }
                Ok(Some(chunk)) => self.assembler.push(&chunk),
            }
        }
    }

    /// Send one packet and wait for the response of type `expected`.
    pub async fn transceive(&mut self, packet: &Packet, expected: u8) -> Result<Packet> {
        let timeout = self.config.response_timeout;
        self.transceive_raw(&packet.encode(), expected, timeout).await
    }

    /// Send pre-framed bytes and correlate the response.
    ///
    /// Valid packets of another type are skipped; the device sends unrelated
    /// notifications now and then.
    pub async fn transceive_raw(
        &mut self,
        data: &[u8],
        expected: u8,
        timeout: Duration,
    ) -> Result<Packet> {
        // drop whatever earlier exchanges left in the stream
        self.subscribe().await?;
        self.send_chunked(data, self.config.chunk_size).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let packet = self.receive_until(deadline, timeout).await?;
            if packet.packet_type() == expected {
                return Ok(packet);
            }
            if packet.is_error() {
                return Err(NiimError::DeviceError);
            }
            if packet.is_invalid() {
                return Err(NiimError::InvalidResponse);
            }
            debug!(expected, got = packet.packet_type(), "Skipping unrelated packet");
        }
    }

    /// Send `cmd` and expect its usual response type.
    pub async fn command(&mut self, cmd: CommandType, data: &[u8]) -> Result<Packet> {
        self.command_with_offset(cmd, data, cmd.response_offset()).await
    }

    pub async fn command_with_offset(
        &mut self,
        cmd: CommandType,
        data: &[u8],
        offset: u8,
    ) -> Result<Packet> {
        let packet = Packet::new(cmd, Bytes::copy_from_slice(data))?;
        self.transceive(&packet, cmd.response_type(offset)).await
    }

    /// Setter-style command: the device answers a boolean.
    pub async fn set_mode(&mut self, cmd: CommandType, values: &[u8]) -> Result<()> {
        let response = self.command(cmd, values).await?;
        if response.as_bool() {
            Ok(())
        } else {
            Err(NiimError::Rejected(cmd.code()))
        }
    }
}
