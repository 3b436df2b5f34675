//! 16.16 fixed-point numbers (`TW_FIX32`).
//!
//! SANE's `SANE_Fixed` uses the same 16-bit shift, so a backend fixed value
//! is carried across by reinterpreting its bits. Plain backend integers are
//! promoted with an exact shift.

use std::fmt;

/// Raw 16.16 fixed-point value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fix32(i32);

impl Fix32 {
    pub const SHIFT: u32 = 16;
    pub const ONE: Fix32 = Fix32(1 << Self::SHIFT);
    pub const ZERO: Fix32 = Fix32(0);

    /// Reinterpret raw bits (a SANE fixed word).
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> i32 {
        self.0
    }

    /// Promote a plain integer. Values outside the 16-bit whole part
    /// saturate.
    pub const fn from_int(value: i32) -> Self {
        let whole = if value > i16::MAX as i32 {
            i16::MAX as i32
        } else if value < i16::MIN as i32 {
            i16::MIN as i32
        } else {
            value
        };
        Self(whole << Self::SHIFT)
    }

    /// Integer part, rounded to nearest.
    pub const fn to_int(self) -> i32 {
        ((self.0 as i64 + (1 << (Self::SHIFT - 1))) >> Self::SHIFT) as i32
    }

    pub fn from_f64(value: f64) -> Self {
        Self((value * 65536.0).round() as i32)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 65536.0
    }

    /// `TW_FIX32.Whole`.
    pub const fn whole(self) -> i16 {
        (self.0 >> Self::SHIFT) as i16
    }

    /// `TW_FIX32.Frac`.
    pub const fn frac(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub const fn from_parts(whole: i16, frac: u16) -> Self {
        Self(((whole as i32) << Self::SHIFT) | frac as i32)
    }
}

impl fmt::Display for Fix32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_promotion_is_exact() {
        for x in [-32768, -1200, -1, 0, 1, 75, 150, 300, 1200, 9600, 32767] {
            let f = Fix32::from_int(x);
            assert_eq!(f.to_bits(), x * 65536);
            assert_eq!(f.to_int(), x);
            assert_eq!(f.frac(), 0);
            assert_eq!(f.whole() as i32, x);
        }
    }

    #[test]
    fn test_large_integers_saturate() {
        assert_eq!(Fix32::from_int(40000).to_int(), 32767);
        assert_eq!(Fix32::from_int(-40000).to_int(), -32768);
        assert!(Fix32::from_int(i32::MAX) > Fix32::ZERO);
    }

    #[test]
    fn test_bits_are_reinterpreted() {
        // 215.9 mm as SANE_FIX
        let sane_word = 0x00D7_E666;
        let f = Fix32::from_bits(sane_word);
        assert_eq!(f.to_bits(), sane_word);
        assert_eq!(Fix32::from_parts(f.whole(), f.frac()), f);
    }

    #[test]
    fn test_negative_parts() {
        let f = Fix32::from_f64(-1.5);
        assert_eq!(f.whole(), -2);
        assert_eq!(f.frac(), 0x8000);
        assert_eq!(Fix32::from_parts(-2, 0x8000), f);
    }

    #[test]
    fn test_to_int_rounds() {
        assert_eq!(Fix32::from_f64(149.6).to_int(), 150);
        assert_eq!(Fix32::from_f64(149.4).to_int(), 149);
    }
}
