use crate::constants::{
    DEFAULT_RESPONSE_OFFSET, ERROR_RESPONSE_TYPE, EXTENDED_RESPONSE_OFFSET, FRAME_HEAD,
    FRAME_HEADER_SIZE, FRAME_TAIL, INVALID_RESPONSE_TYPE, MAX_PAYLOAD_LEN, MIN_FRAME_SIZE,
};
use crate::error::{NiimError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;

/// Request codes understood by the printer firmware.
///
/// Responses come back as `request + offset` (usually 1, sometimes 16), so a
/// response type generally does not map onto one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    StartPrint = 0x01,
    StartPage = 0x03,
    SetDimension = 0x13,
    SetQuantity = 0x15,
    GetRfid = 0x1A,
    AllowClear = 0x20,
    SetLabelDensity = 0x21,
    SetLabelType = 0x23,
    GetInfo = 0x40,
    ImageSet = 0x83,
    ImageClear = 0x84,
    ImageData = 0x85,
    GetPrintStatus = 0xA3,
    /// 16-bit row offset followed by the last row byte
    ImageReceived = 0xD3,
    Heartbeat = 0xDC,
    EndPage = 0xE3,
    EndPrint = 0xF3,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl CommandType {
    pub fn code(self) -> u8 {
        self.into()
    }

    /// Response type the device answers this request with.
    pub fn response_type(self, offset: u8) -> u8 {
        self.code().wrapping_add(offset)
    }

    /// Offset between request and response type.
    ///
    /// `GetInfo` answers with `0x40 + key` instead; callers pass the key.
    pub fn response_offset(self) -> u8 {
        match self {
            CommandType::SetLabelType
            | CommandType::AllowClear
            | CommandType::SetDimension
            | CommandType::GetPrintStatus => EXTENDED_RESPONSE_OFFSET,
            _ => DEFAULT_RESPONSE_OFFSET,
        }
    }
}

/// Whether `decode` enforces the trailing checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    #[default]
    Validate,
    /// Some device-originated frames carry a checksum the host cannot reproduce
    Skip,
}

/// One framed message: `55 55 <type> <len> <payload..> <checksum> AA AA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: u8,
    payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: impl Into<u8>, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() >= MAX_PAYLOAD_LEN {
            return Err(NiimError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            packet_type: packet_type.into(),
            payload,
        })
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    pub fn command(&self) -> CommandType {
        CommandType::from_primitive(self.packet_type)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.packet_type == ERROR_RESPONSE_TYPE
    }

    pub fn is_invalid(&self) -> bool {
        self.packet_type == INVALID_RESPONSE_TYPE
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.packet_type, &self.payload)
    }

    /// Size of the encoded frame in bytes.
    pub fn wire_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.wire_len());
        frame.put_slice(&FRAME_HEAD);
        frame.put_u8(self.packet_type);
        // Packet::new guarantees the length fits
        frame.put_u8(self.payload.len() as u8);
        frame.put_slice(&self.payload);
        frame.put_u8(self.checksum());
        frame.put_slice(&FRAME_TAIL);
        frame.freeze()
    }

    /// Parse one complete frame.
    pub fn decode(bytes: &[u8], mode: ChecksumMode) -> Result<Self> {
        if bytes.len() < MIN_FRAME_SIZE {
            return Err(NiimError::Framing(format!("frame too short: {} bytes", bytes.len())));
        }
        if bytes[..2] != FRAME_HEAD {
            return Err(NiimError::Framing(format!("bad start marker {:02x?}", &bytes[..2])));
        }
        if bytes[bytes.len() - 2..] != FRAME_TAIL {
            let tail = &bytes[bytes.len() - 2..];
            return Err(NiimError::Framing(format!("bad end marker {:02x?}", tail)));
        }

        let packet_type = bytes[2];
        let len = bytes[3] as usize;
        if bytes.len() != MIN_FRAME_SIZE + len {
            return Err(NiimError::Framing(format!(
                "length byte says {} payload bytes, frame carries {}",
                len,
                bytes.len() - MIN_FRAME_SIZE
            )));
        }

        let payload = &bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
        if mode == ChecksumMode::Validate {
            let expected = checksum(packet_type, payload);
            let actual = bytes[FRAME_HEADER_SIZE + len];
            if expected != actual {
                return Err(NiimError::Checksum { expected, actual });
            }
        }

        Ok(Self {
            packet_type,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn byte_at(&self, pos: usize) -> Option<u8> {
        self.payload.get(pos).copied()
    }

    /// Payload read as a big-endian unsigned integer (low 64 bits).
    pub fn as_int(&self) -> u64 {
        self.payload.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    pub fn as_bool(&self) -> bool {
        self.payload.first().is_some_and(|&b| b > 0)
    }

    pub fn as_hex(&self) -> String {
        hex::encode_upper(&self.payload)
    }
}

impl TryFrom<Bytes> for Packet {
    type Error = NiimError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        Packet::decode(&bytes, ChecksumMode::Validate)
    }
}

impl From<Packet> for Bytes {
    fn from(packet: Packet) -> Self {
        packet.encode()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[type={:#04x} len={} data={}]", self.packet_type, self.len(), self.as_hex())
    }
}

/// Encode a frame straight from its parts.
pub fn encode(packet_type: u8, payload: &[u8]) -> Result<Bytes> {
    Ok(Packet::new(packet_type, Bytes::copy_from_slice(payload))?.encode())
}

/// XOR of the type byte, the length byte and every payload byte.
pub fn checksum(packet_type: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(packet_type ^ payload.len() as u8, |acc, &b| acc ^ b)
}

/// Reassembles frames from notification chunks that may split or join them.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete frame, dropping garbage in front of it.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.buffer.windows(2).position(|w| w == FRAME_HEAD) {
                Some(start) => self.buffer.advance(start),
                None => {
                    // keep a lone trailing 0x55, it may start the next head
                    let keep = usize::from(self.buffer.last() == Some(&FRAME_HEAD[0]));
                    let drop = self.buffer.len() - keep;
                    self.buffer.advance(drop);
                    return None;
                }
            }

            if self.buffer.len() < FRAME_HEADER_SIZE {
                return None;
            }
            let total = MIN_FRAME_SIZE + self.buffer[3] as usize;
            if self.buffer.len() < total {
                // a complete frame further in means this head was noise
                match self.later_complete_frame() {
                    Some(start) => {
                        self.buffer.advance(start);
                        continue;
                    }
                    None => return None,
                }
            }
            if self.buffer[total - 2..total] == FRAME_TAIL {
                return Some(self.buffer.split_to(total).freeze());
            }
            // not a real frame head, resynchronise one byte further
            self.buffer.advance(1);
        }
    }

    /// Offset of the first head after position 0 that starts a whole frame with a valid trailer.
    fn later_complete_frame(&self) -> Option<usize> {
        (1..self.buffer.len()).find(|&start| {
            let rest = &self.buffer[start..];
            if rest.len() < FRAME_HEADER_SIZE || rest[..2] != FRAME_HEAD {
                return false;
            }
            let total = MIN_FRAME_SIZE + rest[3] as usize;
            rest.len() >= total && rest[total - 2..total] == FRAME_TAIL
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_folds_type_len_and_payload() {
        assert_eq!(checksum(0xDC, &[0x01]), 0xDC ^ 0x01 ^ 0x01);
        assert_eq!(checksum(0x40, &[]), 0x40);
    }

    #[test]
    fn test_assembler_keeps_partial_head() {
        let frame = Packet::new(CommandType::Heartbeat, vec![0x01]).unwrap().encode();
        let mut asm = FrameAssembler::new();
        asm.push(&[0x00, 0x12, frame[0]]);
        assert!(asm.next_frame().is_none());
        assert_eq!(asm.buffered(), 1);
        asm.push(&frame[1..]);
        assert_eq!(asm.next_frame().unwrap(), frame);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn test_assembler_resyncs_after_false_head() {
        let frame = Packet::new(0x22u8, vec![0x01]).unwrap().encode();
        let mut asm = FrameAssembler::new();
        // a false head whose length byte points past a bad trailer
        asm.push(&[0x55, 0x55, 0x10, 0x00, 0x99, 0x12, 0x34]);
        asm.push(&frame);
        assert_eq!(asm.next_frame().unwrap(), frame);
    }

    #[test]
    fn test_assembler_skips_false_head_with_long_length() {
        let frame = Packet::new(CommandType::Heartbeat, vec![0x01]).unwrap().encode();
        let mut asm = FrameAssembler::new();
        // the 0x10 length would need 23 bytes, the real frame is already here
        asm.push(&[0x55, 0x55, 0x10, 0xF0]);
        asm.push(&frame);
        assert_eq!(asm.next_frame().unwrap(), frame);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn test_assembler_waits_on_genuine_partial_frame() {
        let frame = Packet::new(CommandType::Heartbeat, vec![0x01; 16]).unwrap().encode();
        let mut asm = FrameAssembler::new();
        asm.push(&frame[..10]);
        assert!(asm.next_frame().is_none());
        assert_eq!(asm.buffered(), 10);
        asm.push(&frame[10..]);
        assert_eq!(asm.next_frame().unwrap(), frame);
    }
}
