//! `fieldstore.toml` handling
//!
//! ```toml
//! [store]
//! equality = "reference"
//!
//! [registry]
//! cleanup_grace_ms = 50
//!
//! [persist]
//! namespace = "app"
//! exclude = ["session.token"]
//! debounce_ms = 0
//! ```

use anyhow::{Context, Result};
use fieldstore_core::{RegistryConfig, StoreConfig};
use fieldstore_persist::PersistConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "fieldstore.toml";

/// Everything the CLI can be configured with
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub persist: PersistConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Explicit path if given, else `fieldstore.toml` in `dir` if present,
    /// else defaults
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = dir.join(CONFIG_FILE);
        if default_path.exists() {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldstore_core::EqualityMode;

    #[test]
    fn test_parse_all_sections() {
        let config = CliConfig::parse(
            r#"
            [store]
            equality = "structural"

            [registry]
            cleanup_grace_ms = 0

            [persist]
            namespace = "app"
            exclude = ["password"]
            debounce_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.store.equality, EqualityMode::Structural);
        assert_eq!(config.registry.cleanup_grace_ms, 0);
        assert_eq!(config.persist.namespace.as_deref(), Some("app"));
        assert_eq!(config.persist.exclude, vec!["password".to_string()]);
        assert_eq!(config.persist.debounce_ms, 250);
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::resolve(None, dir.path()).unwrap();
        assert_eq!(config.store.equality, EqualityMode::Reference);
        assert!(config.persist.namespace.is_none());
    }

    #[test]
    fn test_resolve_reads_default_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[persist]\nnamespace = \"cli\"\n").unwrap();

        let config = CliConfig::resolve(None, dir.path()).unwrap();
        assert_eq!(config.persist.namespace.as_deref(), Some("cli"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CliConfig::resolve(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = CliConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = CliConfig::parse(&text).unwrap();
        assert_eq!(parsed.registry.cleanup_grace_ms, config.registry.cleanup_grace_ms);
    }
}
