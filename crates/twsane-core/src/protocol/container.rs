//! Capability containers (`TW_ONEVALUE`, `TW_RANGE`, `TW_ENUMERATION`,
//! `TW_ARRAY`) and their wire layout.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use thiserror::Error;

use super::constants::*;
use super::fix32::Fix32;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Unknown item type 0x{0:04X}")]
    UnknownItemType(u16),
    #[error("Unknown container type 0x{0:04X}")]
    UnknownContainer(u16),
    #[error("Item type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch { expected: ItemType, actual: ItemType },
    #[error("{0} is not a numeric item type")]
    NotNumeric(&'static str),
    #[error("Range step must be at least 1")]
    BadStep,
    #[error("Index {index} out of bounds for {len} items")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `TWTY_*` item types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    UInt32,
    Bool,
    Fix32,
    Frame,
    Str32,
    Str64,
    Str128,
    Str255,
}

impl ItemType {
    pub fn code(self) -> u16 {
        match self {
            ItemType::Int8 => TWTY_INT8,
            ItemType::Int16 => TWTY_INT16,
            ItemType::Int32 => TWTY_INT32,
            ItemType::UInt8 => TWTY_UINT8,
            ItemType::UInt16 => TWTY_UINT16,
            ItemType::UInt32 => TWTY_UINT32,
            ItemType::Bool => TWTY_BOOL,
            ItemType::Fix32 => TWTY_FIX32,
            ItemType::Frame => TWTY_FRAME,
            ItemType::Str32 => TWTY_STR32,
            ItemType::Str64 => TWTY_STR64,
            ItemType::Str128 => TWTY_STR128,
            ItemType::Str255 => TWTY_STR255,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ContainerError> {
        Ok(match code {
            TWTY_INT8 => ItemType::Int8,
            TWTY_INT16 => ItemType::Int16,
            TWTY_INT32 => ItemType::Int32,
            TWTY_UINT8 => ItemType::UInt8,
            TWTY_UINT16 => ItemType::UInt16,
            TWTY_UINT32 => ItemType::UInt32,
            TWTY_BOOL => ItemType::Bool,
            TWTY_FIX32 => ItemType::Fix32,
            TWTY_FRAME => ItemType::Frame,
            TWTY_STR32 => ItemType::Str32,
            TWTY_STR64 => ItemType::Str64,
            TWTY_STR128 => ItemType::Str128,
            TWTY_STR255 => ItemType::Str255,
            other => return Err(ContainerError::UnknownItemType(other)),
        })
    }

    /// Size of one item in an item list.
    pub fn size(self) -> usize {
        match self {
            ItemType::Int8 | ItemType::UInt8 => 1,
            ItemType::Int16 | ItemType::UInt16 | ItemType::Bool => 2,
            ItemType::Int32 | ItemType::UInt32 | ItemType::Fix32 => 4,
            ItemType::Frame => 16,
            ItemType::Str32 => 34,
            ItemType::Str64 => 66,
            ItemType::Str128 => 130,
            ItemType::Str255 => 256,
        }
    }

    fn is_numeric(self) -> bool {
        !matches!(
            self,
            ItemType::Frame
                | ItemType::Str32
                | ItemType::Str64
                | ItemType::Str128
                | ItemType::Str255
        )
    }
}

/// `TW_FRAME`: a rectangle in 16.16 units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub left: Fix32,
    pub top: Fix32,
    pub right: Fix32,
    pub bottom: Fix32,
}

/// A single typed item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Bool(bool),
    Fix32(Fix32),
    Frame(Frame),
    Str32(String),
    Str64(String),
    Str128(String),
    Str255(String),
}

impl Item {
    pub fn item_type(&self) -> ItemType {
        match self {
            Item::Int8(_) => ItemType::Int8,
            Item::Int16(_) => ItemType::Int16,
            Item::Int32(_) => ItemType::Int32,
            Item::UInt8(_) => ItemType::UInt8,
            Item::UInt16(_) => ItemType::UInt16,
            Item::UInt32(_) => ItemType::UInt32,
            Item::Bool(_) => ItemType::Bool,
            Item::Fix32(_) => ItemType::Fix32,
            Item::Frame(_) => ItemType::Frame,
            Item::Str32(_) => ItemType::Str32,
            Item::Str64(_) => ItemType::Str64,
            Item::Str128(_) => ItemType::Str128,
            Item::Str255(_) => ItemType::Str255,
        }
    }

    /// The item as a 32-bit container word (`TW_ONEVALUE.Item`,
    /// `TW_RANGE` fields). Strings and frames have no word form.
    pub fn to_word(&self) -> Option<u32> {
        Some(match self {
            Item::Int8(v) => *v as i32 as u32,
            Item::Int16(v) => *v as i32 as u32,
            Item::Int32(v) => *v as u32,
            Item::UInt8(v) => *v as u32,
            Item::UInt16(v) => *v as u32,
            Item::UInt32(v) => *v,
            Item::Bool(v) => *v as u32,
            Item::Fix32(v) => fix32_word(*v),
            _ => return None,
        })
    }

    pub fn from_word(item_type: ItemType, word: u32) -> Result<Self, ContainerError> {
        Ok(match item_type {
            ItemType::Int8 => Item::Int8(word as i8),
            ItemType::Int16 => Item::Int16(word as i16),
            ItemType::Int32 => Item::Int32(word as i32),
            ItemType::UInt8 => Item::UInt8(word as u8),
            ItemType::UInt16 => Item::UInt16(word as u16),
            ItemType::UInt32 => Item::UInt32(word),
            ItemType::Bool => Item::Bool(word & 0xffff != 0),
            ItemType::Fix32 => Item::Fix32(word_fix32(word)),
            _ => return Err(ContainerError::NotNumeric("string or frame")),
        })
    }

    /// Numeric value widened to 16.16; integers are promoted exactly.
    pub fn as_fix32(&self) -> Option<Fix32> {
        Some(match self {
            Item::Fix32(v) => *v,
            Item::Int8(v) => Fix32::from_int(*v as i32),
            Item::Int16(v) => Fix32::from_int(*v as i32),
            Item::Int32(v) => Fix32::from_int(*v),
            Item::UInt8(v) => Fix32::from_int(*v as i32),
            Item::UInt16(v) => Fix32::from_int(*v as i32),
            Item::UInt32(v) => Fix32::from_int(*v as i32),
            _ => return None,
        })
    }

    /// Numeric value as a plain integer; fixed values are rounded.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            Item::Int8(v) => *v as i64,
            Item::Int16(v) => *v as i64,
            Item::Int32(v) => *v as i64,
            Item::UInt8(v) => *v as i64,
            Item::UInt16(v) => *v as i64,
            Item::UInt32(v) => *v as i64,
            Item::Bool(v) => *v as i64,
            Item::Fix32(v) => v.to_int() as i64,
            _ => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ContainerError> {
        match self {
            Item::Int8(v) => w.write_i8(*v)?,
            Item::Int16(v) => w.write_i16::<LittleEndian>(*v)?,
            Item::Int32(v) => w.write_i32::<LittleEndian>(*v)?,
            Item::UInt8(v) => w.write_u8(*v)?,
            Item::UInt16(v) => w.write_u16::<LittleEndian>(*v)?,
            Item::UInt32(v) => w.write_u32::<LittleEndian>(*v)?,
            Item::Bool(v) => w.write_u16::<LittleEndian>(*v as u16)?,
            Item::Fix32(v) => write_fix32(w, *v)?,
            Item::Frame(f) => {
                write_fix32(w, f.left)?;
                write_fix32(w, f.top)?;
                write_fix32(w, f.right)?;
                write_fix32(w, f.bottom)?;
            }
            Item::Str32(s) | Item::Str64(s) | Item::Str128(s) | Item::Str255(s) => {
                let size = self.item_type().size();
                let mut raw = vec![0u8; size];
                let bytes = s.as_bytes();
                // always leave room for the terminating NUL
                let n = bytes.len().min(size - 1);
                raw[..n].copy_from_slice(&bytes[..n]);
                w.write_all(&raw)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(item_type: ItemType, r: &mut R) -> Result<Self, ContainerError> {
        Ok(match item_type {
            ItemType::Int8 => Item::Int8(r.read_i8()?),
            ItemType::Int16 => Item::Int16(r.read_i16::<LittleEndian>()?),
            ItemType::Int32 => Item::Int32(r.read_i32::<LittleEndian>()?),
            ItemType::UInt8 => Item::UInt8(r.read_u8()?),
            ItemType::UInt16 => Item::UInt16(r.read_u16::<LittleEndian>()?),
            ItemType::UInt32 => Item::UInt32(r.read_u32::<LittleEndian>()?),
            ItemType::Bool => Item::Bool(r.read_u16::<LittleEndian>()? != 0),
            ItemType::Fix32 => Item::Fix32(read_fix32(r)?),
            ItemType::Frame => Item::Frame(Frame {
                left: read_fix32(r)?,
                top: read_fix32(r)?,
                right: read_fix32(r)?,
                bottom: read_fix32(r)?,
            }),
            ItemType::Str32 | ItemType::Str64 | ItemType::Str128 | ItemType::Str255 => {
                let mut raw = vec![0u8; item_type.size()];
                r.read_exact(&mut raw)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let s = String::from_utf8_lossy(&raw[..end]).into_owned();
                match item_type {
                    ItemType::Str32 => Item::Str32(s),
                    ItemType::Str64 => Item::Str64(s),
                    ItemType::Str128 => Item::Str128(s),
                    _ => Item::Str255(s),
                }
            }
        })
    }
}

// TW_FIX32 is laid out Whole (i16) then Frac (u16).
fn write_fix32<W: Write>(w: &mut W, v: Fix32) -> std::io::Result<()> {
    w.write_i16::<LittleEndian>(v.whole())?;
    w.write_u16::<LittleEndian>(v.frac())
}

fn read_fix32<R: Read>(r: &mut R) -> std::io::Result<Fix32> {
    let whole = r.read_i16::<LittleEndian>()?;
    let frac = r.read_u16::<LittleEndian>()?;
    Ok(Fix32::from_parts(whole, frac))
}

// A TW_FIX32 stored in a TW_UINT32 slot keeps its in-memory layout.
fn fix32_word(v: Fix32) -> u32 {
    (v.whole() as u16 as u32) | ((v.frac() as u32) << 16)
}

fn word_fix32(word: u32) -> Fix32 {
    Fix32::from_parts((word & 0xffff) as u16 as i16, (word >> 16) as u16)
}

/// `TW_RANGE`.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    item_type: ItemType,
    pub min: Item,
    pub max: Item,
    pub step: Item,
    pub default: Item,
    pub current: Item,
}

impl Range {
    pub fn new(
        min: Item,
        max: Item,
        step: Item,
        default: Item,
        current: Item,
    ) -> Result<Self, ContainerError> {
        let item_type = min.item_type();
        if !item_type.is_numeric() {
            return Err(ContainerError::NotNumeric("range item"));
        }
        for item in [&max, &step, &default, &current] {
            if item.item_type() != item_type {
                return Err(ContainerError::TypeMismatch {
                    expected: item_type,
                    actual: item.item_type(),
                });
            }
        }
        let step_positive = match &step {
            Item::Fix32(f) => f.to_bits() >= 1,
            other => other.as_i64().unwrap_or(0) >= 1,
        };
        if !step_positive {
            return Err(ContainerError::BadStep);
        }
        Ok(Self {
            item_type,
            min,
            max,
            step,
            default,
            current,
        })
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }
}

/// `TW_ENUMERATION`.
#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration {
    item_type: ItemType,
    items: Vec<Item>,
    current_index: usize,
    default_index: usize,
}

impl Enumeration {
    pub fn new(
        item_type: ItemType,
        items: Vec<Item>,
        current_index: usize,
        default_index: usize,
    ) -> Result<Self, ContainerError> {
        if let Some(bad) = items.iter().find(|i| i.item_type() != item_type) {
            return Err(ContainerError::TypeMismatch {
                expected: item_type,
                actual: bad.item_type(),
            });
        }
        for index in [current_index, default_index] {
            if index >= items.len() {
                return Err(ContainerError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
        }
        Ok(Self {
            item_type,
            items,
            current_index,
            default_index,
        })
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn default_index(&self) -> usize {
        self.default_index
    }

    pub fn current(&self) -> &Item {
        &self.items[self.current_index]
    }

    pub fn default_item(&self) -> &Item {
        &self.items[self.default_index]
    }
}

/// Tagged capability container.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    OneValue(Item),
    Range(Range),
    Enumeration(Enumeration),
    Array { item_type: ItemType, items: Vec<Item> },
}

impl Container {
    pub fn kind(&self) -> u16 {
        match self {
            Container::OneValue(_) => TWON_ONEVALUE,
            Container::Range(_) => TWON_RANGE,
            Container::Enumeration(_) => TWON_ENUMERATION,
            Container::Array { .. } => TWON_ARRAY,
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Container::OneValue(item) => item.item_type(),
            Container::Range(r) => r.item_type(),
            Container::Enumeration(e) => e.item_type(),
            Container::Array { item_type, .. } => *item_type,
        }
    }

    /// The single value carried by a `TW_ONEVALUE`.
    pub fn one_value(&self) -> Option<&Item> {
        match self {
            Container::OneValue(item) => Some(item),
            _ => None,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ContainerError> {
        w.write_u16::<LittleEndian>(self.item_type().code())?;
        match self {
            Container::OneValue(item) => match item.to_word() {
                Some(word) => w.write_u32::<LittleEndian>(word)?,
                // strings and frames are stored inline
                None => item.write_to(w)?,
            },
            Container::Range(r) => {
                for item in [&r.min, &r.max, &r.step, &r.default, &r.current] {
                    let word = item.to_word().ok_or(ContainerError::NotNumeric("range"))?;
                    w.write_u32::<LittleEndian>(word)?;
                }
            }
            Container::Enumeration(e) => {
                w.write_u32::<LittleEndian>(e.items.len() as u32)?;
                w.write_u32::<LittleEndian>(e.current_index as u32)?;
                w.write_u32::<LittleEndian>(e.default_index as u32)?;
                for item in &e.items {
                    item.write_to(w)?;
                }
            }
            Container::Array { items, .. } => {
                w.write_u32::<LittleEndian>(items.len() as u32)?;
                for item in items {
                    item.write_to(w)?;
                }
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(kind: u16, r: &mut R) -> Result<Self, ContainerError> {
        let item_type = ItemType::from_code(r.read_u16::<LittleEndian>()?)?;
        Ok(match kind {
            TWON_ONEVALUE => {
                if item_type.is_numeric() {
                    Container::OneValue(Item::from_word(
                        item_type,
                        r.read_u32::<LittleEndian>()?,
                    )?)
                } else {
                    Container::OneValue(Item::read_from(item_type, r)?)
                }
            }
            TWON_RANGE => {
                let mut words = [0u32; 5];
                for word in &mut words {
                    *word = r.read_u32::<LittleEndian>()?;
                }
                let [min, max, step, default, current] =
                    words.map(|w| Item::from_word(item_type, w));
                Container::Range(Range::new(min?, max?, step?, default?, current?)?)
            }
            TWON_ENUMERATION => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                let current = r.read_u32::<LittleEndian>()? as usize;
                let default = r.read_u32::<LittleEndian>()? as usize;
                let items = (0..count)
                    .map(|_| Item::read_from(item_type, r))
                    .collect::<Result<Vec<_>, _>>()?;
                Container::Enumeration(Enumeration::new(item_type, items, current, default)?)
            }
            TWON_ARRAY => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                let items = (0..count)
                    .map(|_| Item::read_from(item_type, r))
                    .collect::<Result<Vec<_>, _>>()?;
                Container::Array { item_type, items }
            }
            other => return Err(ContainerError::UnknownContainer(other)),
        })
    }
}

/// `TW_CAPABILITY`: capability id plus an optional container. Get requests
/// arrive without a container and leave with one.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub id: u16,
    pub container: Option<Container>,
}

impl Capability {
    pub fn request(id: u16) -> Self {
        Self {
            id,
            container: None,
        }
    }

    pub fn with_value(id: u16, item: Item) -> Self {
        Self {
            id,
            container: Some(Container::OneValue(item)),
        }
    }

    /// Serialize as `Cap`, `ConType`, then the container body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(self.id)?;
        match &self.container {
            Some(c) => {
                buf.write_u16::<LittleEndian>(c.kind())?;
                c.write_to(&mut buf)?;
            }
            None => buf.write_u16::<LittleEndian>(0xffff)?,
        }
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ContainerError> {
        let mut cursor = Cursor::new(data);
        let id = cursor.read_u16::<LittleEndian>()?;
        let kind = cursor.read_u16::<LittleEndian>()?;
        let container = if kind == 0xffff {
            None
        } else {
            Some(Container::read_from(kind, &mut cursor)?)
        };
        Ok(Self { id, container })
    }
}
