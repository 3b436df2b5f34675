//! Capability translator.
//!
//! Maps the fixed set of TWAIN capabilities onto backend options found by
//! well-known name. Numbers always cross over as 16.16: backend integers
//! are shifted, backend fixed words are reinterpreted bit for bit.
//!
//! - `pixel_type`: scan mode classification
//! - `area`: scan area geometry and edge ordering

pub mod area;
pub mod pixel_type;

pub use area::{AreaUnit, Edge, Representation, ScanRegion};
pub use pixel_type::{PixelClass, classify};

use tracing::{debug, info};

use crate::backend::{
    Backend, NumericConstraint, OptionDescriptor, OptionValue, SetInfo, constrain_value,
};
use crate::error::TwainError;
use crate::protocol::constants::*;
use crate::protocol::{Capability, Container, Enumeration, Fix32, Item, ItemType, Range};
use crate::session::DeviceSession;

/// How images reach the host (`ICAP_XFERMECH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMechanism {
    #[default]
    Native,
    Memory,
}

impl TransferMechanism {
    pub fn code(self) -> u16 {
        match self {
            TransferMechanism::Native => TWSX_NATIVE,
            TransferMechanism::Memory => TWSX_MEMORY,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            TWSX_NATIVE => Some(TransferMechanism::Native),
            TWSX_MEMORY => Some(TransferMechanism::Memory),
            _ => None,
        }
    }
}

/// Capability values held by the session rather than the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub indicators: bool,
    pub mechanism: TransferMechanism,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            indicators: true,
            mechanism: TransferMechanism::Native,
        }
    }
}

const READ: i32 = TWQC_GET | TWQC_GETCURRENT;
const READ_DEFAULT: i32 = READ | TWQC_GETDEFAULT;
const ALL: i32 = READ_DEFAULT | TWQC_SET | TWQC_RESET;

/// Every capability the source answers to, with the messages it accepts.
const CAPABILITIES: &[(u16, i32)] = &[
    (CAP_XFERCOUNT, ALL),
    (CAP_SUPPORTEDCAPS, READ),
    (CAP_UICONTROLLABLE, READ),
    (CAP_DEVICEONLINE, READ),
    (CAP_INDICATORS, ALL),
    (CAP_CUSTOMDSDATA, READ),
    (CAP_ENABLEDSUIONLY, READ),
    (ICAP_COMPRESSION, ALL),
    (ICAP_PLANARCHUNKY, ALL),
    (ICAP_PIXELFLAVOR, READ_DEFAULT),
    (ICAP_BITORDER, READ_DEFAULT),
    (ICAP_UNITS, ALL),
    (ICAP_XFERMECH, ALL),
    (ICAP_PIXELTYPE, ALL),
    (ICAP_BITDEPTH, ALL),
    (ICAP_BRIGHTNESS, ALL),
    (ICAP_CONTRAST, ALL),
    (ICAP_XRESOLUTION, ALL),
    (ICAP_YRESOLUTION, ALL),
    (ICAP_XNATIVERESOLUTION, READ),
    (ICAP_YNATIVERESOLUTION, READ),
    (ICAP_PHYSICALWIDTH, READ),
    (ICAP_PHYSICALHEIGHT, READ),
    (CUSTCAP_AREA_TOP, ALL),
    (CUSTCAP_AREA_LEFT, ALL),
    (CUSTCAP_AREA_BOTTOM, ALL),
    (CUSTCAP_AREA_RIGHT, ALL),
];

/// `TWQC_*` mask of a capability, `None` if it is not supported at all.
pub fn supported_messages(cap: u16) -> Option<i32> {
    CAPABILITIES
        .iter()
        .find(|(id, _)| *id == cap)
        .map(|(_, mask)| *mask)
}

/// Name of the resolution option for one axis, falling back to the
/// shared `resolution` option.
fn resolution_option<B: Backend>(devices: &DeviceSession<B>, axis: &'static str) -> &'static str {
    if devices.options().active(axis).is_some() {
        axis
    } else {
        "resolution"
    }
}

/// Current horizontal and vertical resolution in dpi; 72 when the device
/// has no resolution option.
pub fn current_resolution<B: Backend>(
    devices: &DeviceSession<B>,
) -> Result<(Fix32, Fix32), TwainError> {
    let read = |axis: &'static str| -> Result<Fix32, TwainError> {
        match devices.options().active(resolution_option(devices, axis)) {
            Some((index, desc)) => {
                let word = devices.get(index)?.as_word().unwrap_or(72);
                Ok(to_fix32(desc, word))
            }
            None => Ok(Fix32::from_int(72)),
        }
    };
    Ok((read("x-resolution")?, read("y-resolution")?))
}

fn to_fix32(desc: &OptionDescriptor, word: i32) -> Fix32 {
    if desc.is_fixed() {
        Fix32::from_bits(word)
    } else {
        Fix32::from_int(word)
    }
}

fn nearest(words: &[i32], target: i32) -> usize {
    words
        .iter()
        .enumerate()
        .min_by_key(|(_, w)| (**w as i64 - target as i64).abs())
        .map_or(0, |(i, _)| i)
}

fn one(item: Item) -> Container {
    Container::OneValue(item)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    All,
    Current,
    Default,
}

/// Item type a numeric capability is exposed with.
#[derive(Debug, Clone, Copy)]
enum Exposed {
    Fix32,
    UInt16,
}

impl Exposed {
    fn item_type(self) -> ItemType {
        match self {
            Exposed::Fix32 => ItemType::Fix32,
            Exposed::UInt16 => ItemType::UInt16,
        }
    }

    fn item(self, desc: &OptionDescriptor, word: i32) -> Item {
        let value = to_fix32(desc, word);
        match self {
            Exposed::Fix32 => Item::Fix32(value),
            Exposed::UInt16 => Item::UInt16(value.to_int().clamp(0, u16::MAX as i32) as u16),
        }
    }
}

/// Container over a fixed list of `TW_UINT16` values.
fn fixed_list(q: Query, values: &[u16], current: usize) -> Result<Container, TwainError> {
    Ok(match q {
        Query::Current => one(Item::UInt16(values[current])),
        Query::Default => one(Item::UInt16(values[0])),
        Query::All => Container::Enumeration(Enumeration::new(
            ItemType::UInt16,
            values.iter().map(|v| Item::UInt16(*v)).collect(),
            current,
            0,
        )?),
    })
}

fn require_value(item: &Item, expected: u16) -> Result<(), TwainError> {
    if item.as_i64() == Some(expected as i64) {
        Ok(())
    } else {
        Err(TwainError::invalid(format!(
            "only {expected} is supported, got {item:?}"
        )))
    }
}

fn numeric(item: &Item) -> Result<Fix32, TwainError> {
    item.as_fix32()
        .ok_or_else(|| TwainError::invalid(format!("numeric value expected, got {item:?}")))
}

/// Serves capability messages against the current device.
pub struct Translator<'a, B: Backend> {
    devices: &'a mut DeviceSession<B>,
    settings: &'a mut TransferSettings,
}

impl<'a, B: Backend> Translator<'a, B> {
    pub fn new(devices: &'a mut DeviceSession<B>, settings: &'a mut TransferSettings) -> Self {
        Self { devices, settings }
    }

    /// Answer one capability message. Get-style messages fill in the
    /// container; Set and Reset report whether the backend adjusted the
    /// value or asked for an option reload.
    pub fn handle(&mut self, msg: u16, cap: &mut Capability) -> Result<SetInfo, TwainError> {
        let supported =
            supported_messages(cap.id).ok_or(TwainError::UnsupportedCapability(cap.id))?;
        let flag = match msg {
            MSG_GET => TWQC_GET,
            MSG_GETCURRENT => TWQC_GETCURRENT,
            MSG_GETDEFAULT => TWQC_GETDEFAULT,
            MSG_SET => TWQC_SET,
            MSG_RESET => TWQC_RESET,
            MSG_QUERYSUPPORT => {
                cap.container = Some(one(Item::Int32(supported)));
                return Ok(SetInfo::default());
            }
            _ => 0,
        };
        if supported & flag == 0 {
            return Err(TwainError::bad_cap_operation(cap.id, msg));
        }

        match msg {
            MSG_SET => {
                let item = match &cap.container {
                    Some(Container::OneValue(item)) => item.clone(),
                    Some(Container::Enumeration(e)) => e.current().clone(),
                    _ => return Err(TwainError::invalid("Set needs a one-value container")),
                };
                self.set(cap.id, &item)
            }
            MSG_RESET => {
                let info = self.reset(cap.id)?;
                cap.container = Some(self.get(cap.id, Query::Current)?);
                Ok(info)
            }
            _ => {
                let q = match msg {
                    MSG_GET => Query::All,
                    MSG_GETCURRENT => Query::Current,
                    _ => Query::Default,
                };
                cap.container = Some(self.get(cap.id, q)?);
                Ok(SetInfo::default())
            }
        }
    }

    fn get(&self, id: u16, q: Query) -> Result<Container, TwainError> {
        Ok(match id {
            // one image per acquisition, as many acquisitions as the host likes
            CAP_XFERCOUNT => one(Item::Int16(-1)),
            CAP_SUPPORTEDCAPS => Container::Array {
                item_type: ItemType::UInt16,
                items: CAPABILITIES.iter().map(|(id, _)| Item::UInt16(*id)).collect(),
            },
            CAP_UICONTROLLABLE | CAP_CUSTOMDSDATA | CAP_ENABLEDSUIONLY => one(Item::Bool(true)),
            CAP_DEVICEONLINE => one(Item::Bool(self.devices.handle().is_ok())),
            CAP_INDICATORS => one(Item::Bool(q == Query::Default || self.settings.indicators)),
            ICAP_COMPRESSION => fixed_list(q, &[TWCP_NONE], 0)?,
            ICAP_PLANARCHUNKY => fixed_list(q, &[TWPC_CHUNKY], 0)?,
            ICAP_PIXELFLAVOR => fixed_list(q, &[TWPF_CHOCOLATE], 0)?,
            ICAP_BITORDER => fixed_list(q, &[TWBO_MSBFIRST], 0)?,
            ICAP_UNITS => fixed_list(q, &[TWUN_INCHES], 0)?,
            ICAP_XFERMECH => {
                let current = match self.settings.mechanism {
                    TransferMechanism::Native => 0,
                    TransferMechanism::Memory => 1,
                };
                fixed_list(q, &[TWSX_NATIVE, TWSX_MEMORY], current)?
            }
            ICAP_PIXELTYPE => self.get_pixel_type(q)?,
            ICAP_BITDEPTH => self.get_numeric(id, "depth", Exposed::UInt16, false, q)?,
            ICAP_BRIGHTNESS => self.get_numeric(id, "brightness", Exposed::Fix32, true, q)?,
            ICAP_CONTRAST => self.get_numeric(id, "contrast", Exposed::Fix32, true, q)?,
            ICAP_XRESOLUTION => {
                let name = resolution_option(self.devices, "x-resolution");
                self.get_numeric(id, name, Exposed::Fix32, false, q)?
            }
            ICAP_YRESOLUTION => {
                let name = resolution_option(self.devices, "y-resolution");
                self.get_numeric(id, name, Exposed::Fix32, false, q)?
            }
            ICAP_XNATIVERESOLUTION => one(Item::Fix32(self.native_resolution(id, "x-resolution")?)),
            ICAP_YNATIVERESOLUTION => one(Item::Fix32(self.native_resolution(id, "y-resolution")?)),
            ICAP_PHYSICALWIDTH => one(Item::Fix32(self.physical_extent(id, Edge::Right)?)),
            ICAP_PHYSICALHEIGHT => one(Item::Fix32(self.physical_extent(id, Edge::Bottom)?)),
            _ => match Edge::from_capability(id) {
                Some(edge) => self.get_numeric(id, edge.option_name(), Exposed::Fix32, false, q)?,
                None => return Err(TwainError::UnsupportedCapability(id)),
            },
        })
    }

    fn set(&mut self, id: u16, item: &Item) -> Result<SetInfo, TwainError> {
        match id {
            CAP_XFERCOUNT => {
                let count = numeric(item)?.to_int();
                if count != -1 {
                    return Err(TwainError::invalid(format!("transfer count {count}")));
                }
            }
            CAP_INDICATORS => {
                self.settings.indicators = item
                    .as_bool()
                    .ok_or_else(|| TwainError::invalid("boolean expected"))?;
            }
            ICAP_COMPRESSION => require_value(item, TWCP_NONE)?,
            ICAP_PLANARCHUNKY => require_value(item, TWPC_CHUNKY)?,
            ICAP_UNITS => require_value(item, TWUN_INCHES)?,
            ICAP_XFERMECH => {
                self.settings.mechanism = item
                    .as_i64()
                    .and_then(|v| u16::try_from(v).ok())
                    .and_then(TransferMechanism::from_code)
                    .ok_or_else(|| TwainError::invalid(format!("transfer mechanism {item:?}")))?;
            }
            ICAP_PIXELTYPE => return self.set_pixel_type(item),
            ICAP_BITDEPTH => return self.set_numeric(id, "depth", item),
            ICAP_BRIGHTNESS => return self.set_numeric(id, "brightness", item),
            ICAP_CONTRAST => return self.set_numeric(id, "contrast", item),
            ICAP_XRESOLUTION => {
                let name = resolution_option(self.devices, "x-resolution");
                return self.set_numeric(id, name, item);
            }
            ICAP_YRESOLUTION => {
                let name = resolution_option(self.devices, "y-resolution");
                return self.set_numeric(id, name, item);
            }
            _ => match Edge::from_capability(id) {
                Some(edge) => return self.set_edge(edge, item),
                None => return Err(TwainError::bad_cap_operation(id, MSG_SET)),
            },
        }
        Ok(SetInfo::default())
    }

    fn reset(&mut self, id: u16) -> Result<SetInfo, TwainError> {
        let default = self.get(id, Query::Default)?;
        let item = default
            .one_value()
            .cloned()
            .ok_or_else(|| TwainError::invalid("capability has no single default"))?;
        self.set(id, &item)
    }

    fn get_numeric(
        &self,
        id: u16,
        name: &str,
        exposed: Exposed,
        neutral: bool,
        q: Query,
    ) -> Result<Container, TwainError> {
        let (index, desc) = self
            .devices
            .options()
            .active(name)
            .ok_or(TwainError::UnsupportedCapability(id))?;
        let constraint = desc
            .numeric()
            .ok_or_else(|| TwainError::invalid(format!("{name} is not numeric")))?;
        let current = self
            .devices
            .get(index)?
            .as_word()
            .ok_or_else(|| TwainError::invalid(format!("{name} has no value")))?;
        let default = self.default_word(name, constraint, neutral).unwrap_or(current);
        let item = |word: i32| exposed.item(desc, word);

        Ok(match q {
            Query::Current => one(item(current)),
            Query::Default => one(item(default)),
            Query::All => match constraint {
                NumericConstraint::None => one(item(current)),
                NumericConstraint::Range { min, max, quant } => Container::Range(Range::new(
                    item(*min),
                    item(*max),
                    item((*quant).max(1)),
                    item(default),
                    item(current),
                )?),
                NumericConstraint::WordList(words) => Container::Enumeration(Enumeration::new(
                    exposed.item_type(),
                    words.iter().map(|w| item(*w)).collect(),
                    nearest(words, current),
                    nearest(words, default),
                )?),
            },
        })
    }

    /// Raw default of a numeric option. Brightness-like options default to
    /// their neutral value, lists to their first entry, everything else to
    /// the value seen when the device was first opened.
    fn default_word(&self, name: &str, constraint: &NumericConstraint, neutral: bool) -> Option<i32> {
        match constraint {
            NumericConstraint::WordList(words) if neutral => words.get(nearest(words, 0)).copied(),
            NumericConstraint::WordList(words) => words.first().copied(),
            NumericConstraint::Range { min, max, .. } if neutral => Some(0.max(*min).min(*max)),
            _ if neutral => Some(0),
            _ => self.devices.factory_value(name).and_then(OptionValue::as_word),
        }
    }

    fn set_numeric(&mut self, id: u16, name: &str, item: &Item) -> Result<SetInfo, TwainError> {
        let (index, desc) = self
            .devices
            .options()
            .active(name)
            .ok_or(TwainError::UnsupportedCapability(id))?;
        let desc = desc.clone();
        let requested = numeric(item)?;
        let word = if desc.is_fixed() {
            requested.to_bits()
        } else {
            requested.to_int()
        };
        let fractional = !desc.is_fixed() && Fix32::from_int(word) != requested;
        let (value, inexact) = constrain_value(&desc, OptionValue::Word(word))
            .map_err(|e| TwainError::invalid(format!("{name}: {e}")))?;
        let (applied, mut info) = self.devices.set(index, value)?;
        info.inexact |= inexact || fractional;
        debug!(option = name, requested = %requested, applied = ?applied, inexact = info.inexact, "Numeric capability set");
        Ok(info)
    }

    fn get_pixel_type(&self, q: Query) -> Result<Container, TwainError> {
        let (index, desc) = self
            .devices
            .options()
            .active("mode")
            .ok_or(TwainError::UnsupportedCapability(ICAP_PIXELTYPE))?;
        let mode = self.devices.get(index)?;
        let current = classify(
            mode.as_text()
                .ok_or_else(|| TwainError::invalid("mode is not a string"))?,
        )?;

        let mut classes: Vec<PixelClass> = Vec::new();
        for class in desc.choices().unwrap_or_default().iter().filter_map(|c| classify(c).ok()) {
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
        if !classes.contains(&current) {
            classes.push(current);
        }

        Ok(match q {
            Query::Current => one(Item::UInt16(current.twain())),
            Query::Default => one(Item::UInt16(classes[0].twain())),
            Query::All => Container::Enumeration(Enumeration::new(
                ItemType::UInt16,
                classes.iter().map(|c| Item::UInt16(c.twain())).collect(),
                classes.iter().position(|c| *c == current).unwrap_or(0),
                0,
            )?),
        })
    }

    /// Select the first scan mode of the requested class. Black and white
    /// falls back to gray on devices without a bilevel mode.
    fn set_pixel_type(&mut self, item: &Item) -> Result<SetInfo, TwainError> {
        let (index, desc) = self
            .devices
            .options()
            .active("mode")
            .ok_or(TwainError::UnsupportedCapability(ICAP_PIXELTYPE))?;
        let choices = desc.choices().map(<[String]>::to_vec).unwrap_or_default();
        let target = item
            .as_i64()
            .and_then(|v| u16::try_from(v).ok())
            .and_then(PixelClass::from_twain)
            .ok_or_else(|| TwainError::invalid(format!("pixel type {item:?}")))?;

        let find = |class: PixelClass| {
            choices
                .iter()
                .find(|c| classify(c).ok() == Some(class))
                .cloned()
        };
        let (mode, fallback) = match find(target) {
            Some(mode) => (mode, false),
            None if target == PixelClass::Bw => match find(PixelClass::Gray) {
                Some(mode) => (mode, true),
                None => return Err(TwainError::invalid("no bilevel or gray mode")),
            },
            None => return Err(TwainError::invalid(format!("no mode for {target:?}"))),
        };
        if fallback {
            info!(mode = %mode, "No black and white mode, using gray");
        }
        let (_, mut info) = self.devices.set(index, OptionValue::Text(mode))?;
        info.inexact |= fallback;
        Ok(info)
    }

    fn set_edge(&mut self, edge: Edge, item: &Item) -> Result<SetInfo, TwainError> {
        let region = ScanRegion::read(self.devices)?;
        let value = numeric(item)?;
        let word = match region.repr {
            Representation::Fixed => value.to_bits(),
            Representation::Int => value.to_int(),
        };
        area::apply(self.devices, &region.with_edge(edge, word))
    }

    fn native_resolution(&self, id: u16, axis: &'static str) -> Result<Fix32, TwainError> {
        let name = resolution_option(self.devices, axis);
        let (index, desc) = self
            .devices
            .options()
            .active(name)
            .ok_or(TwainError::UnsupportedCapability(id))?;
        let max = match desc.numeric().and_then(NumericConstraint::max) {
            Some(max) => max,
            None => self.devices.get(index)?.as_word().unwrap_or_default(),
        };
        Ok(to_fix32(desc, max))
    }

    /// Largest extent of the bed along one axis, in inches.
    fn physical_extent(&self, id: u16, edge: Edge) -> Result<Fix32, TwainError> {
        let (index, desc) = self
            .devices
            .options()
            .active(edge.option_name())
            .ok_or(TwainError::UnsupportedCapability(id))?;
        let max = match desc.numeric().and_then(NumericConstraint::max) {
            Some(max) => max,
            None => self.devices.get(index)?.as_word().unwrap_or_default(),
        };
        let region = ScanRegion::read(self.devices)?;
        let (x_dpi, y_dpi) = current_resolution(self.devices)?;
        let dpi = if edge == Edge::Right { x_dpi } else { y_dpi };
        Ok(region.word_to_inches(max, dpi.to_f64()))
    }
}
