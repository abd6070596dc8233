use crate::error::{NiimError, Result};

/// Monochrome image, row-major, `true` = ink. Width is always a multiple of 8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    pixels: Vec<bool>,
}

impl Bitmap {
    pub fn new(width: usize, height: usize, pixels: Vec<bool>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(NiimError::InvalidBitmap(format!("empty bitmap {}x{}", width, height)));
        }
        if width % 8 != 0 {
            return Err(NiimError::InvalidBitmap(format!("width {} is not a multiple of 8", width)));
        }
        if pixels.len() != width * height {
            return Err(NiimError::InvalidBitmap(format!(
                "expected {} pixels for {}x{}, got {}",
                width * height,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// All-white bitmap.
    pub fn blank(width: usize, height: usize) -> Result<Self> {
        Self::new(width, height, vec![false; width * height])
    }

    /// Build from rows of equal length.
    pub fn from_rows(rows: &[Vec<bool>]) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(NiimError::InvalidBitmap(format!("row {} differs in width", bad)));
        }
        Self::new(width, rows.len(), rows.concat())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<bool> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, ink: bool) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = ink;
        }
    }

    pub fn row(&self, y: usize) -> &[bool] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn ink_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }

    /// Swap ink and paper.
    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().map(|p| !p).collect(),
        }
    }

    /// Rotate 90° clockwise, for models that feed labels sideways.
    ///
    /// Fails if the new width (old height) is not a multiple of 8.
    pub fn rotated_clockwise(&self) -> Result<Self> {
        let (w, h) = (self.height, self.width);
        let mut pixels = vec![false; w * h];
        for y in 0..h {
            for x in 0..w {
                pixels[y * w + x] = self.pixels[(self.height - 1 - x) * self.width + y];
            }
        }
        Self::new(w, h, pixels)
    }
}
