use crate::constants::PRINTER_DPI;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Print darkness, 1 (lightest) to 5.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Density {
    #[strum(to_string = "1")]
    One = 1,
    #[strum(to_string = "2")]
    Two = 2,
    #[default]
    #[strum(to_string = "3")]
    Three = 3,
    #[strum(to_string = "4")]
    Four = 4,
    #[strum(to_string = "5")]
    Five = 5,
}

impl Density {
    pub fn value(self) -> u8 {
        self.into()
    }
}

/// Printer families, identified by the advertised name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum Product {
    B1,
    B18,
    B21,
    D11,
    D110,
    D101,
    #[default]
    Unknown,
}

impl Product {
    /// Parse a name such as `B21-C2090123`; only the part before `-` counts.
    pub fn from_device_name(name: &str) -> Self {
        let prefix = name.split('-').next().unwrap_or_default();
        match prefix.to_ascii_uppercase().as_str() {
            "B1" => Product::B1,
            "B18" => Product::B18,
            "B21" => Product::B21,
            "D11" => Product::D11,
            "D110" => Product::D110,
            "D101" => Product::D101,
            _ => Product::Unknown,
        }
    }

    /// Printable width across the head.
    ///
    /// B-series heads are 384 px (~48 mm); D-series 96 px (~12 mm).
    pub fn effective_print_width_mm(self) -> f64 {
        match self {
            Product::B1 | Product::B18 | Product::B21 => 48.0,
            _ => 12.0,
        }
    }

    /// D-series models feed labels sideways, so the canvas is rotated.
    pub fn prints_vertically(self) -> bool {
        !matches!(self, Product::B1 | Product::B18 | Product::B21)
    }

    pub fn effective_print_width_px(self) -> usize {
        millimeters_to_pixels(self.effective_print_width_mm())
    }
}

pub fn millimeters_to_pixels(mm: f64) -> usize {
    const MM_PER_INCH: f64 = 25.4;
    (mm / MM_PER_INCH * f64::from(PRINTER_DPI)).ceil() as usize
}
