//! Store and registry configuration
//!
//! Every section can be loaded from TOML; missing keys fall back to defaults.
//!
//! ```toml
//! [store]
//! equality = "structural"
//!
//! [registry]
//! cleanup_grace_ms = 50
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path as FsPath;
use std::time::Duration;

/// Delay between the last detach of an auto-cleanup store and its teardown.
///
/// A reattach inside this window keeps the store alive with its state.
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_millis(50);

/// How a freshly written container with unchanged content is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityMode {
    /// A new container reports its own path even when no leaf changed
    #[default]
    Reference,
    /// A new container whose content is equal reports nothing
    Structural,
}

/// Per-store settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub equality: EqualityMode,
}

/// Shared-store registry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Grace window in milliseconds; `0` tears down on the last detach
    pub cleanup_grace_ms: u64,
}

impl RegistryConfig {
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn with_cleanup_grace(grace: Duration) -> Self {
        Self {
            cleanup_grace_ms: grace.as_millis() as u64,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_grace_ms: DEFAULT_CLEANUP_GRACE.as_millis() as u64,
        }
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldstoreConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
}

impl FieldstoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            crate::error::StoreError::Config(format!("{}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&text)
    }
}
