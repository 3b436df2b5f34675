//! Persisted per-device preferences.
//!
//! The same schema is used for the preference file and for the
//! `DAT_CUSTOMDSDATA` blob a host may save and restore.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed preferences: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Cannot encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// A persisted option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistedValue {
    Bool(bool),
    Number(f64),
    Numbers(Vec<f64>),
    Text(String),
}

/// Option name to value.
pub type OptionSnapshot = BTreeMap<String, PersistedValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Display name of the device selected last.
    pub current_device: Option<String>,
    /// Option snapshot per device display name.
    pub devices: BTreeMap<String, OptionSnapshot>,
}

/// Settings of one device, as exchanged through `DAT_CUSTOMDSDATA`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomData {
    pub device: Option<String>,
    pub options: OptionSnapshot,
}

impl CustomData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(toml::to_string(self)?.into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        let text = String::from_utf8_lossy(data);
        Ok(toml::from_str(text.trim_end_matches('\0'))?)
    }
}

/// Key-value persistence for preferences.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Preferences, StoreError>;
    fn save(&self, prefs: &Preferences) -> Result<(), StoreError>;
}

/// Preferences kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    prefs: Mutex<Preferences>,
}

impl PreferenceStore for MemoryStore {
    fn load(&self) -> Result<Preferences, StoreError> {
        Ok(self
            .prefs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        *self.prefs.lock().unwrap_or_else(PoisonError::into_inner) = prefs.clone();
        Ok(())
    }
}

/// Preferences in a TOML file. A missing file reads as empty preferences.
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PreferenceStore for TomlFileStore {
    fn load(&self) -> Result<Preferences, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(prefs)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Preferences {
        let mut options = OptionSnapshot::new();
        options.insert("mode".into(), PersistedValue::Text("Color".into()));
        options.insert("resolution".into(), PersistedValue::Number(300.0));
        options.insert("br-x".into(), PersistedValue::Number(215.899_993_896_484_4));
        options.insert("preview".into(), PersistedValue::Bool(false));
        options.insert("gamma".into(), PersistedValue::Numbers(vec![0.0, 128.0, 255.0]));
        let mut devices = BTreeMap::new();
        devices.insert("Simulated Flatbed 2400 (sim)".to_string(), options);
        Preferences {
            current_device: Some("Simulated Flatbed 2400 (sim)".into()),
            devices,
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFileStore::new(dir.path().join("nested").join("prefs.toml"));
        assert_eq!(store.load().unwrap(), Preferences::default());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "devices = 3").unwrap();
        assert!(matches!(
            TomlFileStore::new(path).load(),
            Err(StoreError::Parse(_))
        ));
    }

    #[test]
    fn test_custom_data_blob() {
        let prefs = sample();
        let blob = CustomData {
            device: prefs.current_device.clone(),
            options: prefs.devices.values().next().cloned().unwrap(),
        };
        let mut bytes = blob.to_bytes().unwrap();
        // hosts may hand back a NUL-padded buffer
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(CustomData::from_bytes(&bytes).unwrap(), blob);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::default();
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().current_device, sample().current_device);
    }
}
