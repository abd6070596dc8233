//! Device status snapshots and the requests that produce them.
//!
//! Field positions in a heartbeat response depend on the total payload
//! length, which differs between firmware generations.

use crate::constants::UNKNOWN_FIELD;
use crate::error::{NiimError, Result};
use crate::link::Link;
use crate::model::Product;
use crate::packet::{CommandType, Packet};
use crate::transceiver::Transceiver;
use bytes::Buf;
use num_enum::IntoPrimitive;
use serde::Serialize;
use std::fmt;
use strum_macros::Display;
use tracing::{debug, warn};

/// Heartbeat layouts, keyed by payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatLayout {
    Len20,
    Len19,
    Len13,
    Len10,
    Len9,
    Unknown,
}

impl HeartbeatLayout {
    fn from_len(len: usize) -> Self {
        match len {
            20 => HeartbeatLayout::Len20,
            19 => HeartbeatLayout::Len19,
            13 => HeartbeatLayout::Len13,
            10 => HeartbeatLayout::Len10,
            9 => HeartbeatLayout::Len9,
            _ => HeartbeatLayout::Unknown,
        }
    }
}

/// Latest heartbeat reading. `-1` means the response did not carry the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub battery: i16,
    pub paper: i16,
    pub closing: i16,
    pub rfid: i16,
}

/// Paper compartment lid as reported by `closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compartment {
    Open,
    Closed,
    Unknown,
    Other(i16),
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compartment::Open => write!(f, "Open"),
            Compartment::Closed => write!(f, "Closed"),
            Compartment::Unknown => write!(f, "Unknown"),
            Compartment::Other(v) => write!(f, "{}", v),
        }
    }
}

impl DeviceStatus {
    pub const UNKNOWN: DeviceStatus = DeviceStatus {
        battery: UNKNOWN_FIELD,
        paper: UNKNOWN_FIELD,
        closing: UNKNOWN_FIELD,
        rfid: UNKNOWN_FIELD,
    };

    pub fn from_heartbeat(payload: &[u8]) -> Self {
        let at = |pos: usize| payload.get(pos).map_or(UNKNOWN_FIELD, |&b| i16::from(b));
        let mut status = Self::UNKNOWN;
        match HeartbeatLayout::from_len(payload.len()) {
            HeartbeatLayout::Len20 => {
                status.paper = at(18);
                status.rfid = at(19);
            }
            HeartbeatLayout::Len19 => {
                status.closing = at(15);
                status.battery = at(16);
                status.paper = at(17);
                status.rfid = at(18);
            }
            HeartbeatLayout::Len13 => {
                status.closing = at(9);
                status.battery = at(10);
                status.paper = at(11);
                status.rfid = at(12);
            }
            HeartbeatLayout::Len10 => {
                status.closing = at(8);
                status.battery = at(9);
                status.rfid = at(8);
            }
            HeartbeatLayout::Len9 => {
                status.closing = at(8);
            }
            HeartbeatLayout::Unknown => {
                debug!(len = payload.len(), "Unrecognised heartbeat length");
            }
        }
        status
    }

    pub fn compartment(&self) -> Compartment {
        match self.closing {
            0 => Compartment::Open,
            1 => Compartment::Closed,
            UNKNOWN_FIELD => Compartment::Unknown,
            other => Compartment::Other(other),
        }
    }
}

/// RFID tag fused into the label roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RfidRollState {
    pub uuid: String,
    pub barcode: String,
    pub serial: String,
    pub used: u16,
    pub total: u16,
    #[serde(rename = "type")]
    pub roll_type: u8,
}

impl RfidRollState {
    /// `[uuid:8][len:1][barcode][len:1][serial][total:2 BE][used:2 BE][type:1]`.
    ///
    /// `None` when no roll is inserted (first byte zero) or the payload ends early.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.first().is_none_or(|&b| b == 0) {
            return None;
        }
        let mut buf = payload;

        let uuid = take(&mut buf, 8)?;
        let barcode_len = take(&mut buf, 1)?[0] as usize;
        let barcode = take(&mut buf, barcode_len)?;
        let serial_len = take(&mut buf, 1)?[0] as usize;
        let serial = take(&mut buf, serial_len)?;
        if buf.remaining() < 5 {
            return None;
        }
        let total = buf.get_u16();
        let used = buf.get_u16();
        let roll_type = buf.get_u8();

        Some(Self {
            uuid: hex::encode_upper(uuid),
            barcode: String::from_utf8_lossy(barcode).into_owned(),
            serial: String::from_utf8_lossy(serial).into_owned(),
            used,
            total,
            roll_type,
        })
    }

    pub fn remaining(&self) -> u16 {
        self.total.saturating_sub(self.used)
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if buf.len() < n {
        return None;
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Some(head)
}

/// Progress of the page being printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrintJobStatus {
    pub page: u16,
    pub progress: [u8; 2],
}

impl PrintJobStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(NiimError::InsufficientData {
                expected: 4,
                actual: payload.len(),
            });
        }
        Ok(Self {
            page: u16::from_be_bytes([payload[0], payload[1]]),
            progress: [payload[2], payload[3]],
        })
    }
}

/// Keys accepted by `GET_INFO`; the response type is `0x40 + key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive)]
#[repr(u8)]
pub enum InfoKey {
    Density = 1,
    PrinterSpeed = 2,
    LabelType = 3,
    LanguageType = 6,
    AutoShutdownTime = 7,
    DeviceType = 8,
    SoftwareVersion = 9,
    Battery = 10,
    DeviceSerial = 11,
    HardwareVersion = 12,
}

impl InfoKey {
    pub fn format(self, response: &Packet) -> String {
        match self {
            InfoKey::DeviceSerial => response.as_hex(),
            InfoKey::SoftwareVersion | InfoKey::HardwareVersion => {
                (response.as_int() / 100).to_string()
            }
            _ => response.as_int().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: Product,
    pub serial: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
}

impl<L: Link> Transceiver<L> {
    pub async fn heartbeat(&mut self) -> Result<DeviceStatus> {
        let response = self.command(CommandType::Heartbeat, &[0x01]).await?;
        Ok(DeviceStatus::from_heartbeat(response.payload()))
    }

    /// `Ok(None)` when no roll is present or the tag data is truncated.
    pub async fn rfid_roll_state(&mut self) -> Result<Option<RfidRollState>> {
        let response = self.command(CommandType::GetRfid, &[0x01]).await?;
        let state = RfidRollState::parse(response.payload());
        if state.is_none() {
            debug!(bytes = response.as_hex(), "No usable RFID data");
        }
        Ok(state)
    }

    pub async fn print_status(&mut self) -> Result<PrintJobStatus> {
        let response = self.command(CommandType::GetPrintStatus, &[0x01]).await?;
        PrintJobStatus::parse(response.payload())
    }

    pub async fn device_info_item(&mut self, key: InfoKey) -> Result<String> {
        let code: u8 = key.into();
        let response = self.command_with_offset(CommandType::GetInfo, &[code], code).await?;
        Ok(key.format(&response))
    }

    /// Read model, serial and versions; items that fail are left empty.
    pub async fn device_info(&mut self) -> DeviceInfo {
        let model = self
            .link()
            .device_name()
            .map_or(Product::Unknown, |name| Product::from_device_name(&name));

        let serial = self.info_or_none(InfoKey::DeviceSerial).await;
        let software_version = self.info_or_none(InfoKey::SoftwareVersion).await;
        let hardware_version = self.info_or_none(InfoKey::HardwareVersion).await;

        DeviceInfo {
            model,
            serial,
            software_version,
            hardware_version,
        }
    }

    async fn info_or_none(&mut self, key: InfoKey) -> Option<String> {
        match self.device_info_item(key).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%key, error = %e, "Failed to read device info");
                None
            }
        }
    }
}
