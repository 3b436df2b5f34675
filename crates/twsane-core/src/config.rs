//! Data source configuration.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::{Identity, Version};

/// Identity strings reported through `DAT_IDENTITY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub manufacturer: String,
    pub product_family: String,
    pub product_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            manufacturer: "twsane".into(),
            product_family: "SANE".into(),
            product_name: "TWAIN SANE Interface".into(),
        }
    }
}

/// Configuration for a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Product names of bridging hosts that must never see a modal alert.
    pub silent_callers: Vec<String>,
    /// Document length assumed when the backend does not know the line
    /// count, used to pre-size the scan buffer.
    pub default_document_length_mm: f64,
    /// Bytes requested per backend read.
    pub read_chunk_size: usize,
    /// TOML file for per-device preferences. Kept in memory when unset.
    pub preferences_path: Option<PathBuf>,
    pub identity: IdentityConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            silent_callers: vec!["TWAIN Bridge".into()],
            default_document_length_mm: 355.6,
            read_chunk_size: 32 * 1024,
            preferences_path: None,
            identity: IdentityConfig::default(),
        }
    }
}

impl SourceConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SourceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn is_silent_caller(&self, product_name: &str) -> bool {
        self.silent_callers.iter().any(|c| c == product_name)
    }

    /// Identity record of the data source.
    pub fn identity(&self) -> Identity {
        Identity {
            version: Version {
                major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
                minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
                info: env!("CARGO_PKG_VERSION").into(),
                ..Version::default()
            },
            manufacturer: self.identity.manufacturer.clone(),
            product_family: self.identity.product_family.clone(),
            product_name: self.identity.product_name.clone(),
            ..Identity::application("")
        }
    }
}
