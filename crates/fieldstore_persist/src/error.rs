//! Storage error types

use std::io;
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// The medium is disabled or cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Writing would exceed the backend's capacity
    #[error("Storage quota exceeded: {used} of {limit} bytes in use, {requested} requested")]
    QuotaExceeded {
        used: usize,
        limit: usize,
        requested: usize,
    },

    /// IO error from a file-backed medium
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key cannot be represented by this backend
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
