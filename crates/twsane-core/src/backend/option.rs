//! Backend option descriptors and values.
//!
//! An option is a tagged union of its value type and constraint: integer and
//! fixed options carry a numeric constraint, string options an optional list
//! of choices, buttons and groups carry nothing.

use super::traits::{BackendError, BackendStatus};

/// Physical unit of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[default]
    None,
    Pixel,
    Bit,
    Mm,
    Dpi,
    Percent,
    Microsecond,
}

/// Capability flags of an option (`SANE_CAP_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionCaps {
    pub active: bool,
    pub settable: bool,
    pub gettable: bool,
    pub automatic: bool,
    pub emulated: bool,
    pub advanced: bool,
}

impl Default for OptionCaps {
    fn default() -> Self {
        Self {
            active: true,
            settable: true,
            gettable: true,
            automatic: false,
            emulated: false,
            advanced: false,
        }
    }
}

impl OptionCaps {
    /// Flags of a value the frontend may only read.
    pub fn read_only() -> Self {
        Self {
            settable: false,
            ..Self::default()
        }
    }
}

/// Constraint on integer and fixed words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericConstraint {
    None,
    Range { min: i32, max: i32, quant: i32 },
    WordList(Vec<i32>),
}

impl NumericConstraint {
    /// Largest value admitted by the constraint.
    pub fn max(&self) -> Option<i32> {
        match self {
            NumericConstraint::None => None,
            NumericConstraint::Range { max, .. } => Some(*max),
            NumericConstraint::WordList(words) => words.iter().copied().max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int(NumericConstraint),
    Fixed(NumericConstraint),
    String { choices: Option<Vec<String>> },
    Button,
    Group,
}

/// `SANE_Option_Descriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub name: String,
    pub title: String,
    pub desc: String,
    pub unit: Unit,
    /// Size of the value in bytes. Words are 4 bytes; more than one word
    /// makes a vector option.
    pub size: usize,
    pub caps: OptionCaps,
    pub kind: OptionKind,
}

impl OptionDescriptor {
    pub fn is_fixed(&self) -> bool {
        matches!(self.kind, OptionKind::Fixed(_))
    }

    pub fn numeric(&self) -> Option<&NumericConstraint> {
        match &self.kind {
            OptionKind::Int(c) | OptionKind::Fixed(c) => Some(c),
            _ => None,
        }
    }

    pub fn choices(&self) -> Option<&[String]> {
        match &self.kind {
            OptionKind::String { choices } => choices.as_deref(),
            _ => None,
        }
    }

    /// Number of words held by a numeric option.
    pub fn word_count(&self) -> usize {
        (self.size / 4).max(1)
    }

    /// Options that hold a value worth reading or persisting.
    pub fn has_value(&self) -> bool {
        !matches!(self.kind, OptionKind::Button | OptionKind::Group)
    }
}

/// Value of an option. Integer and fixed options share the word form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Word(i32),
    Words(Vec<i32>),
    Text(String),
    Button,
}

impl OptionValue {
    pub fn as_word(&self) -> Option<i32> {
        match self {
            OptionValue::Word(w) => Some(*w),
            OptionValue::Words(ws) => ws.first().copied(),
            OptionValue::Bool(b) => Some(*b as i32),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn inval() -> BackendError {
    BackendError::new(BackendStatus::Inval)
}

/// Fit `value` to the option's constraint the way a backend would.
///
/// Returns the adjusted value and whether it differs from the request.
/// Values of the wrong type, and string values that match no choice or more
/// than one, are rejected with `Inval`.
pub fn constrain_value(
    desc: &OptionDescriptor,
    value: OptionValue,
) -> Result<(OptionValue, bool), BackendError> {
    match (&desc.kind, value) {
        (OptionKind::Bool, OptionValue::Bool(b)) => Ok((OptionValue::Bool(b), false)),
        (OptionKind::Int(c) | OptionKind::Fixed(c), OptionValue::Word(w)) => {
            let (w, inexact) = constrain_word(c, w);
            Ok((OptionValue::Word(w), inexact))
        }
        (OptionKind::Int(c) | OptionKind::Fixed(c), OptionValue::Words(words)) => {
            if words.len() != desc.word_count() {
                return Err(inval());
            }
            let mut inexact = false;
            let words = words
                .into_iter()
                .map(|w| {
                    let (v, changed) = constrain_word(c, w);
                    inexact |= changed;
                    v
                })
                .collect();
            Ok((OptionValue::Words(words), inexact))
        }
        (OptionKind::String { choices }, OptionValue::Text(s)) => match choices {
            None => Ok((OptionValue::Text(s), false)),
            Some(list) => {
                let matched = match_choice(list, &s).ok_or_else(inval)?;
                Ok((OptionValue::Text(matched.to_string()), false))
            }
        },
        (OptionKind::Button, OptionValue::Button) => Ok((OptionValue::Button, false)),
        _ => Err(inval()),
    }
}

fn constrain_word(constraint: &NumericConstraint, w: i32) -> (i32, bool) {
    match constraint {
        NumericConstraint::None => (w, false),
        NumericConstraint::Range { min, max, quant } => {
            let (min, max) = (*min as i64, *max as i64);
            let mut v = (w as i64).clamp(min, max);
            if *quant > 0 {
                let quant = *quant as i64;
                v = (v - min + quant / 2) / quant * quant + min;
                while v > max {
                    v -= quant;
                }
            }
            (v as i32, v != w as i64)
        }
        NumericConstraint::WordList(words) => {
            let nearest = words
                .iter()
                .copied()
                .min_by_key(|x| (*x as i64 - w as i64).abs())
                .unwrap_or(w);
            (nearest, nearest != w)
        }
    }
}

/// Exact case-insensitive match wins, otherwise a unique prefix.
fn match_choice<'a>(choices: &'a [String], s: &str) -> Option<&'a str> {
    if let Some(exact) = choices.iter().find(|c| c.eq_ignore_ascii_case(s)) {
        return Some(exact);
    }
    let needle = s.to_ascii_lowercase();
    let mut hits = choices
        .iter()
        .filter(|c| c.to_ascii_lowercase().starts_with(&needle));
    match (hits.next(), hits.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
