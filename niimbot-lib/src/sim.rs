//! In-memory printer behind the [`Link`] trait.
//!
//! Answers every command the way a B21 does, unless told otherwise through
//! its [`SimHandle`]. Used by the test suite and the `simulate` CLI command.

use crate::constants::{ERROR_RESPONSE_TYPE, INVALID_RESPONSE_TYPE};
use crate::error::{NiimError, Result};
use crate::link::{Link, Notifications};
use crate::packet::{self, ChecksumMode, CommandType, FrameAssembler, Packet};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Type of the unsolicited packet sent ahead of replies in noisy mode.
pub const NOISE_PACKET_TYPE: u8 = 0xF0;

/// How the simulator answers one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Expected type, payload `[1]`
    Ack,
    /// Expected type, payload `[0]`
    Reject,
    /// Error sentinel
    Error,
    /// Invalid-request sentinel
    Invalid,
    /// No answer at all
    Silent,
    /// Expected type with the given payload
    Payload(Vec<u8>),
}

struct SimState {
    connected: bool,
    refuse_connect: bool,
    connects: u32,
    notify: Option<mpsc::UnboundedSender<Bytes>>,
    inbox: FrameAssembler,
    received: Vec<Packet>,
    write_sizes: Vec<usize>,
    heartbeat: Vec<u8>,
    rfid: Vec<u8>,
    info: HashMap<u8, Vec<u8>>,
    status_polls: u32,
    status_remaining: u32,
    overrides: HashMap<u8, Reply>,
    queued: HashMap<u8, VecDeque<Reply>>,
    noise: bool,
    notify_split: Option<usize>,
}

impl SimState {
    fn reply_for(&mut self, request: &Packet) -> Option<(u8, Vec<u8>)> {
        let cmd = request.command();
        let code = cmd.code();
        let expected = match cmd {
            CommandType::GetInfo => cmd.response_type(request.byte_at(0).unwrap_or_default()),
            CommandType::ImageSet | CommandType::ImageClear | CommandType::ImageData => {
                CommandType::ImageReceived.code()
            }
            _ => cmd.response_type(cmd.response_offset()),
        };

        let scripted = self
            .queued
            .get_mut(&code)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.overrides.get(&code).cloned());

        match scripted {
            Some(Reply::Ack) => Some((expected, vec![1])),
            Some(Reply::Reject) => Some((expected, vec![0])),
            Some(Reply::Error) => Some((ERROR_RESPONSE_TYPE, vec![0])),
            Some(Reply::Invalid) => Some((INVALID_RESPONSE_TYPE, vec![0])),
            Some(Reply::Silent) => None,
            Some(Reply::Payload(payload)) => Some((expected, payload)),
            None => self.default_reply(cmd, request, expected),
        }
    }

    fn default_reply(
        &mut self,
        cmd: CommandType,
        request: &Packet,
        expected: u8,
    ) -> Option<(u8, Vec<u8>)> {
        let payload = match cmd {
            CommandType::Heartbeat => self.heartbeat.clone(),
            CommandType::GetRfid => self.rfid.clone(),
            CommandType::GetInfo => {
                let key = request.byte_at(0).unwrap_or_default();
                self.info.get(&key).cloned().unwrap_or_else(|| vec![0])
            }
            CommandType::ImageSet | CommandType::ImageClear | CommandType::ImageData => {
                let body = request.payload();
                let n = body.last().copied().unwrap_or_default();
                vec![request.byte_at(0)?, request.byte_at(1)?, n]
            }
            CommandType::StartPrint => {
                self.status_remaining = self.status_polls;
                vec![1]
            }
            CommandType::GetPrintStatus => {
                if self.status_remaining == 0 {
                    return Some((ERROR_RESPONSE_TYPE, vec![0]));
                }
                self.status_remaining -= 1;
                let done = self.status_polls - self.status_remaining;
                let percent = (done * 100 / self.status_polls).min(100) as u8;
                vec![0, 1, percent, percent]
            }
            CommandType::Unknown(_) => return Some((INVALID_RESPONSE_TYPE, vec![0])),
            _ => vec![1],
        };
        Some((expected, payload))
    }

    fn notify(&mut self, packet_type: u8, payload: &[u8]) {
        let frame = match packet::encode(packet_type, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Simulated reply does not fit in a frame");
                return;
            }
        };
        let Some(tx) = self.notify.as_ref() else {
            trace!("No subscriber, reply dropped");
            return;
        };
        let pieces: Vec<Bytes> = match self.notify_split {
            Some(size) if size > 0 => frame.chunks(size).map(Bytes::copy_from_slice).collect(),
            _ => vec![frame],
        };
        for piece in pieces {
            // receiver gone means the host resubscribed; nothing to do
            let _ = tx.send(piece);
        }
    }

    fn handle_frames(&mut self) {
        while let Some(frame) = self.inbox.next_frame() {
            let request = match Packet::decode(&frame, ChecksumMode::Validate) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Simulator ignoring garbled request");
                    continue;
                }
            };
            let reply = self.reply_for(&request);
            self.received.push(request);
            if let Some((packet_type, payload)) = reply {
                if self.noise {
                    self.notify(NOISE_PACKET_TYPE, &[0]);
                }
                self.notify(packet_type, &payload);
            }
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated printer. Starts paired and connected.
pub struct SimulatedPrinter {
    state: Arc<Mutex<SimState>>,
    name: Option<String>,
    max_chunk: usize,
}

impl Default for SimulatedPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPrinter {
    pub fn new() -> Self {
        let info = HashMap::from([
            (11, vec![0x12, 0x34, 0xAB]),
            // 300 and 200, reported as "3" and "2"
            (9, vec![0x01, 0x2C]),
            (12, vec![0x00, 0xC8]),
        ]);
        let state = SimState {
            connected: true,
            refuse_connect: false,
            connects: 0,
            notify: None,
            inbox: FrameAssembler::new(),
            received: Vec::new(),
            write_sizes: Vec::new(),
            heartbeat: default_heartbeat(1),
            rfid: default_rfid(),
            info,
            status_polls: 3,
            status_remaining: 0,
            overrides: HashMap::new(),
            queued: HashMap::new(),
            noise: false,
            notify_split: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            name: Some("B21-SIM00001".to_string()),
            max_chunk: 512,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    /// Largest write the simulated radio accepts.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    pub fn with_heartbeat(self, payload: Vec<u8>) -> Self {
        lock(&self.state).heartbeat = payload;
        self
    }

    pub fn with_rfid(self, payload: Vec<u8>) -> Self {
        lock(&self.state).rfid = payload;
        self
    }

    /// Number of progress answers to `GET_PRINT_STATUS` after each `START_PRINT`.
    pub fn with_status_polls(self, polls: u32) -> Self {
        lock(&self.state).status_polls = polls;
        self
    }

    /// Send an unrelated packet ahead of every reply.
    pub fn with_noise(self) -> Self {
        lock(&self.state).noise = true;
        self
    }

    /// Deliver replies in notifications of at most `size` bytes.
    pub fn with_notification_split(self, size: usize) -> Self {
        lock(&self.state).notify_split = Some(size);
        self
    }

    pub fn disconnected(self) -> Self {
        lock(&self.state).connected = false;
        self
    }

    pub fn refusing_connect(self) -> Self {
        lock(&self.state).refuse_connect = true;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Link for SimulatedPrinter {
    async fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.refuse_connect {
            return Err(NiimError::LinkDisconnected);
        }
        state.connected = true;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(NiimError::LinkDisconnected);
        }
        if chunk.len() > self.max_chunk {
            return Err(NiimError::WriteFailed(format!(
                "{} bytes exceeds the {} byte limit",
                chunk.len(),
                self.max_chunk
            )));
        }
        state.write_sizes.push(chunk.len());
        state.inbox.push(chunk);
        state.handle_frames();
        Ok(())
    }

    async fn subscribe_notifications(&mut self) -> Result<Notifications> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(NiimError::LinkDisconnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.notify = Some(tx);
        Ok(rx)
    }

    fn max_writable_chunk_size(&self) -> usize {
        self.max_chunk
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.notify = None;
        state.inbox.clear();
        Ok(())
    }

    fn device_name(&self) -> Option<String> {
        self.name.clone()
    }
}

/// Observes and scripts a [`SimulatedPrinter`] after it was handed to a session.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Every well-formed request, in arrival order.
    pub fn received(&self) -> Vec<Packet> {
        lock(&self.state).received.clone()
    }

    pub fn received_commands(&self) -> Vec<CommandType> {
        lock(&self.state).received.iter().map(Packet::command).collect()
    }

    pub fn count(&self, cmd: CommandType) -> usize {
        lock(&self.state).received.iter().filter(|p| p.command() == cmd).count()
    }

    pub fn clear_received(&self) {
        lock(&self.state).received.clear();
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        lock(&self.state).write_sizes.clone()
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Drop or restore the radio link. Dropping ends the notification stream.
    pub fn set_connected(&self, connected: bool) {
        let mut state = lock(&self.state);
        state.connected = connected;
        if !connected {
            state.notify = None;
        }
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// Answer `cmd` with `reply` from now on.
    pub fn set_reply(&self, cmd: CommandType, reply: Reply) {
        lock(&self.state).overrides.insert(cmd.code(), reply);
    }

    /// Answer the next `cmd` with `reply`, ahead of any persistent override.
    pub fn push_reply(&self, cmd: CommandType, reply: Reply) {
        lock(&self.state).queued.entry(cmd.code()).or_default().push_back(reply);
    }

    pub fn clear_reply(&self, cmd: CommandType) {
        let mut state = lock(&self.state);
        state.overrides.remove(&cmd.code());
        state.queued.remove(&cmd.code());
    }

    pub fn set_heartbeat(&self, payload: Vec<u8>) {
        lock(&self.state).heartbeat = payload;
    }

    pub fn set_rfid(&self, payload: Vec<u8>) {
        lock(&self.state).rfid = payload;
    }

    /// Push an unsolicited frame to the current subscriber.
    pub fn notify(&self, packet_type: u8, payload: &[u8]) {
        lock(&self.state).notify(packet_type, payload);
    }
}

/// 13-byte heartbeat: lid state at 9, battery 4, paper present, tag present.
pub fn default_heartbeat(closing: u8) -> Vec<u8> {
    let mut payload = vec![0; 9];
    payload.extend_from_slice(&[closing, 4, 1, 1]);
    payload
}

/// Tag of a 160-label roll with 3 labels used.
pub fn default_rfid() -> Vec<u8> {
    let mut payload = vec![0x88, 0x10, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F];
    let barcode = b"6972842743589";
    payload.push(barcode.len() as u8);
    payload.extend_from_slice(barcode);
    let serial = b"PZ1G2034";
    payload.push(serial.len() as u8);
    payload.extend_from_slice(serial);
    payload.extend_from_slice(&160u16.to_be_bytes());
    payload.extend_from_slice(&3u16.to_be_bytes());
    payload.push(1);
    payload
}
