//! Error types for fieldstore_core

use std::fmt;
use thiserror::Error;

/// Errors raised by store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed path argument
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A value of the wrong shape was passed (e.g. `set_values` with a scalar)
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A shared store was attached with inconsistent cleanup policies
    #[error("store '{id}' is configured with {existing} cleanup but was attached with {requested}")]
    IdentifierConflict {
        id: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// No shared store is registered under this identifier
    #[error("unknown store: {0}")]
    UnknownStore(String),

    /// No action is registered under this name
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// An action returned an error
    #[error("action '{name}' failed: {source}")]
    ActionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// One or more watch callbacks failed during a commit
    #[error("{0}")]
    WatchCallback(WatchFailures),

    /// The store was torn down
    #[error("store has been destroyed")]
    Destroyed,

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        StoreError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    /// Returns true for errors that indicate a programming or configuration
    /// mistake rather than a runtime data condition.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            StoreError::IdentifierConflict { .. }
                | StoreError::UnknownStore(_)
                | StoreError::Config(_)
        )
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

/// A single failed watch callback
#[derive(Debug)]
pub struct WatchFailure {
    /// Pattern the watcher was registered on
    pub pattern: String,
    /// Concrete path that triggered it
    pub path: String,
    pub error: anyhow::Error,
}

/// Every watch failure collected during one commit
#[derive(Debug, Default)]
pub struct WatchFailures(pub Vec<WatchFailure>);

impl WatchFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchFailure> {
        self.0.iter()
    }
}

impl fmt::Display for WatchFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} watch callback(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(
                f,
                "; {} (at {}): {}",
                failure.pattern, failure.path, failure.error
            )?;
        }
        Ok(())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let err = StoreError::invalid_path("a..b", "empty segment");
        assert!(err.to_string().contains("a..b"));
        assert!(err.to_string().contains("empty segment"));
    }

    #[test]
    fn test_conflict_is_configuration_error() {
        let err = StoreError::IdentifierConflict {
            id: "cart".into(),
            existing: "automatic",
            requested: "manual",
        };
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("cart"));
        assert!(!StoreError::Destroyed.is_configuration_error());
    }

    #[test]
    fn test_watch_failures_display() {
        let failures = WatchFailures(vec![WatchFailure {
            pattern: "todos.*.completed".into(),
            path: "todos.1.completed".into(),
            error: anyhow::anyhow!("boom"),
        }]);
        let text = StoreError::WatchCallback(failures).to_string();
        assert!(text.contains("1 watch callback(s) failed"));
        assert!(text.contains("todos.1.completed"));
        assert!(text.contains("boom"));
    }
}
