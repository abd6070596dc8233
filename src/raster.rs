//! Image files to printer bitmaps.

use anyhow::{Context, Result};
use image::DynamicImage;
use niimbot_lib::Bitmap;
use std::path::Path;

/// Luma below this is ink
const INK_THRESHOLD: u8 = 128;

/// Open any format the `image` crate decodes (PNG, PBM, BMP, ...).
pub fn load(path: &Path) -> Result<Bitmap> {
    let image = image::open(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    to_bitmap(&image)
}

/// Threshold to ink/no-ink, padding the width with blank columns to a multiple of 8.
///
/// Transparent pixels never print.
pub fn to_bitmap(image: &DynamicImage) -> Result<Bitmap> {
    let gray = image.to_luma_alpha8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let padded = width.div_ceil(8) * 8;

    let mut pixels = Vec::new();
    for y in 0..height {
        for x in 0..padded {
            let ink = x < width && {
                let [luma, alpha] = gray.get_pixel(x as u32, y as u32).0;
                alpha >= INK_THRESHOLD && luma < INK_THRESHOLD
            };
            pixels.push(ink);
        }
    }
    Ok(Bitmap::new(padded, height, pixels)?)
}
