//! Scan area geometry.
//!
//! The area lives in four backend options (`tl-x`, `tl-y`, `br-x`, `br-y`).
//! Values always travel with their representation and unit.

use tracing::debug;

use crate::backend::{Backend, OptionValue, SetInfo, Unit, constrain_value};
use crate::error::TwainError;
use crate::protocol::constants::*;
use crate::protocol::{Fix32, Frame};
use crate::session::DeviceSession;

/// One side of the scan area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Top,
    Left,
    Bottom,
    Right,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::Top, Edge::Left, Edge::Bottom, Edge::Right];

    pub fn option_name(self) -> &'static str {
        match self {
            Edge::Top => "tl-y",
            Edge::Left => "tl-x",
            Edge::Bottom => "br-y",
            Edge::Right => "br-x",
        }
    }

    pub fn capability(self) -> u16 {
        match self {
            Edge::Top => CUSTCAP_AREA_TOP,
            Edge::Left => CUSTCAP_AREA_LEFT,
            Edge::Bottom => CUSTCAP_AREA_BOTTOM,
            Edge::Right => CUSTCAP_AREA_RIGHT,
        }
    }

    pub fn from_capability(cap: u16) -> Option<Self> {
        Edge::ALL.into_iter().find(|e| e.capability() == cap)
    }
}

/// How the backend encodes a geometry word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Int,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaUnit {
    Inches,
    Mm,
    Pixel,
}

impl From<Unit> for AreaUnit {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::Mm => AreaUnit::Mm,
            Unit::Pixel => AreaUnit::Pixel,
            _ => AreaUnit::Inches,
        }
    }
}

/// Scan rectangle in raw backend words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub repr: Representation,
    pub unit: AreaUnit,
}

impl ScanRegion {
    /// Current area of the active device.
    pub fn read<B: Backend>(devices: &DeviceSession<B>) -> Result<Self, TwainError> {
        let mut words = [0i32; 4];
        let mut repr = Representation::Int;
        let mut unit = AreaUnit::Inches;
        for (slot, edge) in words.iter_mut().zip(Edge::ALL) {
            let (index, desc) = devices
                .options()
                .active(edge.option_name())
                .ok_or(TwainError::UnsupportedCapability(edge.capability()))?;
            repr = if desc.is_fixed() {
                Representation::Fixed
            } else {
                Representation::Int
            };
            unit = desc.unit.into();
            *slot = devices
                .get(index)?
                .as_word()
                .ok_or_else(|| TwainError::invalid(format!("{} is not numeric", edge.option_name())))?;
        }
        let [top, left, bottom, right] = words;
        Ok(Self {
            top,
            left,
            bottom,
            right,
            repr,
            unit,
        })
    }

    pub fn edge(&self, edge: Edge) -> i32 {
        match edge {
            Edge::Top => self.top,
            Edge::Left => self.left,
            Edge::Bottom => self.bottom,
            Edge::Right => self.right,
        }
    }

    pub fn with_edge(mut self, edge: Edge, word: i32) -> Self {
        match edge {
            Edge::Top => self.top = word,
            Edge::Left => self.left = word,
            Edge::Bottom => self.bottom = word,
            Edge::Right => self.right = word,
        }
        self
    }

    /// Word as a number in the region's unit.
    pub fn to_units(&self, word: i32) -> f64 {
        match self.repr {
            Representation::Fixed => Fix32::from_bits(word).to_f64(),
            Representation::Int => word as f64,
        }
    }

    pub fn from_units(&self, value: f64) -> i32 {
        match self.repr {
            Representation::Fixed => Fix32::from_f64(value).to_bits(),
            Representation::Int => value.round() as i32,
        }
    }

    /// Inches per unit; `dpi` is used for pixel units.
    fn inch_factor(&self, dpi: f64) -> f64 {
        match self.unit {
            AreaUnit::Inches => 1.0,
            AreaUnit::Mm => 1.0 / 25.4,
            AreaUnit::Pixel => 1.0 / dpi.max(1.0),
        }
    }

    /// Word in inches.
    pub fn word_to_inches(&self, word: i32, dpi: f64) -> Fix32 {
        Fix32::from_f64(self.to_units(word) * self.inch_factor(dpi))
    }

    /// The area as a TWAIN frame in inches.
    pub fn to_frame(&self, x_dpi: f64, y_dpi: f64) -> Frame {
        Frame {
            left: self.word_to_inches(self.left, x_dpi),
            top: self.word_to_inches(self.top, y_dpi),
            right: self.word_to_inches(self.right, x_dpi),
            bottom: self.word_to_inches(self.bottom, y_dpi),
        }
    }

    /// The same kind of region covering `frame` (inches).
    pub fn with_frame(&self, frame: &Frame, x_dpi: f64, y_dpi: f64) -> Self {
        let word = |v: Fix32, dpi: f64| self.from_units(v.to_f64() / self.inch_factor(dpi));
        Self {
            top: word(frame.top, y_dpi),
            left: word(frame.left, x_dpi),
            bottom: word(frame.bottom, y_dpi),
            right: word(frame.right, x_dpi),
            ..*self
        }
    }

    /// Short size description for area preset menus, e.g. `215.9 x 297.0 mm`.
    pub fn label(&self) -> String {
        let width = self.to_units(self.right) - self.to_units(self.left);
        let height = self.to_units(self.bottom) - self.to_units(self.top);
        match self.unit {
            AreaUnit::Mm => format!("{width:.1} x {height:.1} mm"),
            AreaUnit::Inches => format!("{width:.2} x {height:.2} in"),
            AreaUnit::Pixel => format!("{width:.0} x {height:.0} px"),
        }
    }
}

/// Move the device's area to `requested`.
///
/// Each edge is first fitted to its option's constraint. Per axis the far
/// edge is written first when it moves outward and last when it moves
/// inward, so the backend never holds a rectangle with negative extent. An
/// edge that would cross its opposite is clamped onto it.
pub fn apply<B: Backend>(
    devices: &mut DeviceSession<B>,
    requested: &ScanRegion,
) -> Result<SetInfo, TwainError> {
    let current = ScanRegion::read(devices)?;
    let mut result = SetInfo::default();

    for (near, far) in [(Edge::Top, Edge::Bottom), (Edge::Left, Edge::Right)] {
        let mut n = constrain_edge(devices, near, requested.edge(near), &mut result)?;
        let mut f = constrain_edge(devices, far, requested.edge(far), &mut result)?;
        if n > f {
            result.inexact = true;
            if n != current.edge(near) && f == current.edge(far) {
                n = f;
            } else {
                f = n;
            }
            debug!(near = ?near, far = ?far, "Inverted area clamped");
        }

        let order = if f >= current.edge(far) {
            [(far, f), (near, n)]
        } else {
            [(near, n), (far, f)]
        };
        for (edge, word) in order {
            if word == current.edge(edge) {
                continue;
            }
            let index = option_index(devices, edge)?;
            let (_, info) = devices.set(index, OptionValue::Word(word))?;
            result = result.merge(info);
        }
    }
    Ok(result)
}

fn option_index<B: Backend>(devices: &DeviceSession<B>, edge: Edge) -> Result<usize, TwainError> {
    devices
        .options()
        .find(edge.option_name())
        .ok_or(TwainError::UnsupportedCapability(edge.capability()))
}

fn constrain_edge<B: Backend>(
    devices: &DeviceSession<B>,
    edge: Edge,
    word: i32,
    result: &mut SetInfo,
) -> Result<i32, TwainError> {
    let desc = devices
        .options()
        .descriptor(option_index(devices, edge)?)
        .ok_or(TwainError::UnsupportedCapability(edge.capability()))?;
    let (value, inexact) = constrain_value(desc, OptionValue::Word(word))
        .map_err(|e| TwainError::invalid(format!("{}: {e}", edge.option_name())))?;
    result.inexact |= inexact;
    value
        .as_word()
        .ok_or_else(|| TwainError::invalid(edge.option_name()))
}
