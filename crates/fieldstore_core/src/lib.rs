//! FieldStore Core
//!
//! A path-addressed reactive value store: many independent observers
//! subscribe to narrow slices of one shared nested value and are notified
//! once per logical change.
//!
//! - **Value Tree**: JSON-like values with copy-on-write structural sharing
//! - **Paths**: dot paths with array indices, a virtual `length` and `*` wildcards
//! - **Subscriptions**: exact, ancestor, descendant, wildcard and global listeners
//! - **Change Detection**: index-wise diffs so only changed leaves notify
//! - **Commits**: batched writes, one notification pass, queued re-entrant writes
//! - **Actions & Watchers**: named operations and declarative side effects
//! - **Shared Stores**: reference-counted stores keyed by identifier
//!
//! # Example
//!
//! ```rust
//! use fieldstore_core::{Store, Value};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let store = Store::new(json!({
//!     "todos": [{"completed": false}, {"completed": false}]
//! }));
//!
//! let toggled = Arc::new(Mutex::new(Vec::new()));
//! let sink = toggled.clone();
//! store
//!     .subscribe("todos.*.completed", move |change| {
//!         sink.lock().unwrap().push(change.path.to_string());
//!     })
//!     .unwrap();
//!
//! store
//!     .set_batch([("todos.0.completed", true), ("todos.1.completed", true)])
//!     .unwrap();
//!
//! assert_eq!(*toggled.lock().unwrap(), vec!["todos.0.completed", "todos.1.completed"]);
//! assert_eq!(store.get_value("todos.length").unwrap(), Value::from(2));
//! ```

pub mod actions;
pub mod config;
pub mod diff;
pub mod error;
pub mod path;
pub mod registry;
pub mod shared;
pub mod store;
pub mod tree;
pub mod trie;
pub mod value;
pub mod watch;

pub use actions::{Action, ActionContext, ActionMap, Actions};
pub use config::{EqualityMode, FieldstoreConfig, RegistryConfig, StoreConfig, DEFAULT_CLEANUP_GRACE};
pub use error::{Result, StoreError, WatchFailure, WatchFailures};
pub use path::{Path, Segment};
pub use registry::{FieldChange, Listener, ListenerId, SubscriptionRegistry};
pub use shared::{CleanupPolicy, StoreRegistry};
pub use store::{Store, StoreBuilder, StoreStats, SubscriptionHandle, Update};
pub use value::{Map, Value};
pub use watch::{WatchCallback, WatchConfig};
