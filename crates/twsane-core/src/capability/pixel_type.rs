//! Classification of backend scan modes into TWAIN pixel types.

use crate::error::TwainError;
use crate::protocol::constants::{TWPT_BW, TWPT_GRAY, TWPT_RGB};

/// Pixel types a scan mode can be set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Bw,
    Gray,
    Rgb,
}

/// Mode name prefixes, matched without regard to case.
const PREFIXES: &[(&str, PixelClass)] = &[
    ("binary", PixelClass::Bw),
    ("lineart", PixelClass::Bw),
    ("halftone", PixelClass::Bw),
    ("gray", PixelClass::Gray),
    ("color", PixelClass::Rgb),
];

impl PixelClass {
    /// `TWPT_*` value.
    pub fn twain(self) -> u16 {
        match self {
            PixelClass::Bw => TWPT_BW,
            PixelClass::Gray => TWPT_GRAY,
            PixelClass::Rgb => TWPT_RGB,
        }
    }

    pub fn from_twain(value: u16) -> Option<Self> {
        match value {
            TWPT_BW => Some(PixelClass::Bw),
            TWPT_GRAY => Some(PixelClass::Gray),
            TWPT_RGB => Some(PixelClass::Rgb),
            _ => None,
        }
    }
}

/// Classify a backend scan mode such as `"Lineart"` or `"Color"`.
pub fn classify(mode: &str) -> Result<PixelClass, TwainError> {
    let lower = mode.to_ascii_lowercase();
    PREFIXES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, class)| *class)
        .ok_or_else(|| TwainError::invalid(format!("unknown scan mode {mode:?}")))
}
