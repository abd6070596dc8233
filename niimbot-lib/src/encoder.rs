//! Bitmap to packet compression.
//!
//! The image is cut into slices of at most [`SLICE_ROWS`] rows. Inside a slice
//! every maximal run of identical rows becomes one packet whose header carries
//! the start row, one set-pixel count per 32-pixel column group and the repeat
//! count. The firmware accepts exactly three bodies:
//!
//! - `IMAGE_CLEAR`: nothing set, header shrinks to `{y, n}`
//! - `IMAGE_SET`: big-endian column indexes, when `2 * set < width / 8`
//! - `IMAGE_DATA`: the row as MSB-first bits otherwise

use crate::bitmap::Bitmap;
use crate::constants::{PIXELS_PER_GROUP, SLICE_ROWS};
use crate::error::{NiimError, Result};
use crate::packet::{CommandType, Packet};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// Packets covering one slice of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBatch {
    y_start: usize,
    rows: usize,
    packets: Vec<Packet>,
}

impl ImageBatch {
    pub fn y_start(&self) -> usize {
        self.y_start
    }

    /// Number of bitmap rows the batch covers.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Every packet of the batch framed back to back, sent as one write.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.packets.iter().map(Packet::wire_len).sum());
        for packet in &self.packets {
            out.put(packet.encode());
        }
        out.freeze()
    }
}

/// Encode a whole bitmap into per-slice batches.
pub fn encode_image(bitmap: &Bitmap) -> Result<Vec<ImageBatch>> {
    if bitmap.height() > usize::from(u16::MAX) + 1 {
        return Err(NiimError::InvalidBitmap(format!(
            "height {} does not fit a 16-bit row offset",
            bitmap.height()
        )));
    }

    let mut batches = Vec::with_capacity(bitmap.height().div_ceil(SLICE_ROWS));
    for slice_start in (0..bitmap.height()).step_by(SLICE_ROWS) {
        let slice_end = (slice_start + SLICE_ROWS).min(bitmap.height());
        let mut packets = Vec::new();

        let mut y = slice_start;
        while y < slice_end {
            let row = bitmap.row(y);
            let mut next = y + 1;
            while next < slice_end && bitmap.row(next) == row {
                next += 1;
            }
            // runs never leave the slice, so n <= 200
            packets.push(encode_rows(row, y as u16, (next - y) as u8)?);
            y = next;
        }

        debug!(
            slice_start,
            rows = slice_end - slice_start,
            packets = packets.len(),
            "Encoded slice"
        );
        batches.push(ImageBatch {
            y_start: slice_start,
            rows: slice_end - slice_start,
            packets,
        });
    }
    Ok(batches)
}

/// Encode one row that repeats `n` times starting at `y_start`.
pub fn encode_rows(row: &[bool], y_start: u16, n: u8) -> Result<Packet> {
    let width = row.len();
    if width == 0 || width % 8 != 0 {
        return Err(NiimError::InvalidBitmap(format!("row width {} is not a multiple of 8", width)));
    }

    let mut header = BytesMut::with_capacity(3 + width.div_ceil(PIXELS_PER_GROUP));
    header.put_u16(y_start);

    let mut indexes: Vec<u16> = Vec::new();
    for group_start in (0..width).step_by(PIXELS_PER_GROUP) {
        // the last group is narrower when width is not a multiple of 32
        let group_end = (group_start + PIXELS_PER_GROUP).min(width);
        let before = indexes.len();
        indexes.extend((group_start..group_end).filter(|&x| row[x]).map(|x| x as u16));
        header.put_u8((indexes.len() - before) as u8);
    }
    header.put_u8(n);

    if indexes.is_empty() {
        let mut clear = BytesMut::with_capacity(3);
        clear.put_u16(y_start);
        clear.put_u8(n);
        return Packet::new(CommandType::ImageClear, clear.freeze());
    }

    if indexes.len() * 2 < width / 8 {
        for index in indexes {
            header.put_u16(index);
        }
        return Packet::new(CommandType::ImageSet, header.freeze());
    }

    for byte in row.chunks(8) {
        let bits = byte
            .iter()
            .enumerate()
            .fold(0u8, |acc, (b, &ink)| if ink { acc | (1 << (7 - b)) } else { acc });
        header.put_u8(bits);
    }
    Packet::new(CommandType::ImageData, header.freeze())
}
