//! FieldStore Persistence
//!
//! Best-effort snapshots of a [`Store`](fieldstore_core::Store) in a
//! key/value medium:
//!
//! - **Backends**: [`MemoryStorage`] (optionally quota limited) and [`FileStorage`]
//! - **Namespaces**: keys are stored as `namespace:key`
//! - **Filtering**: `exclude` paths never reach storage
//! - **Debounce**: bursts of saves collapse into one write
//!
//! # Example
//!
//! ```rust
//! use fieldstore_core::Store;
//! use fieldstore_persist::{MemoryStorage, PersistAdapter, PersistConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let adapter = Arc::new(PersistAdapter::new(
//!     MemoryStorage::new(),
//!     PersistConfig {
//!         namespace: Some("app".into()),
//!         exclude: vec!["password".into()],
//!         ..Default::default()
//!     },
//! ));
//!
//! let store = Store::new(json!({"user": "ada", "password": "hunter2"}));
//! let _saving = adapter.bind(&store, "login");
//! store.set_value("user", "grace").unwrap();
//!
//! let saved = adapter.load("login").unwrap();
//! assert!(saved.as_object().unwrap().get("password").is_none());
//! ```

pub mod adapter;
pub mod error;
pub mod storage;

pub use adapter::{PersistAdapter, PersistConfig};
pub use error::{Result, StorageError};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
