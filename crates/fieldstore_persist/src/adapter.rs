//! Snapshot persistence for stores
//!
//! A [`PersistAdapter`] saves store snapshots to a [`KeyValueStorage`] as a
//! JSON envelope:
//!
//! ```json
//! {"values": {...}, "timestamp": 42}
//! ```
//!
//! `timestamp` is a logical clock that increases with every write made by
//! the adapter. Persistence is best effort: backend failures are logged and
//! reported as `false`/`None`, never raised.

use crate::storage::KeyValueStorage;
use fieldstore_core::{tree, Path, Store, SubscriptionHandle, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Adapter settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Prefix added to every key as `namespace:key`
    pub namespace: Option<String>,
    /// Dot paths removed from snapshots before saving
    pub exclude: Vec<String>,
    /// Delay before a saved snapshot is written; `0` writes immediately
    pub debounce_ms: u64,
}

impl PersistConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    values: serde_json::Value,
    timestamp: u64,
}

struct PendingSave {
    values: Value,
    due: Instant,
}

/// Saves and restores store snapshots
pub struct PersistAdapter {
    storage: Arc<dyn KeyValueStorage>,
    namespace: Option<String>,
    exclude: Vec<Path>,
    debounce: Duration,
    clock: AtomicU64,
    /// Debounced snapshots by storage key
    pending: Mutex<FxHashMap<String, PendingSave>>,
}

impl PersistAdapter {
    pub fn new(storage: impl KeyValueStorage + 'static, config: PersistConfig) -> Self {
        Self::with_storage(Arc::new(storage), config)
    }

    /// Adapter over shared storage. Malformed `exclude` paths are skipped
    /// with a warning.
    pub fn with_storage(storage: Arc<dyn KeyValueStorage>, config: PersistConfig) -> Self {
        let exclude = config
            .exclude
            .iter()
            .filter_map(|raw| match Path::parse_write(raw) {
                Ok(path) if !path.is_root() => Some(path),
                Ok(_) => {
                    tracing::warn!("ignoring empty exclude path");
                    None
                }
                Err(err) => {
                    tracing::warn!(path = %raw, error = %err, "ignoring invalid exclude path");
                    None
                }
            })
            .collect();

        Self {
            storage,
            debounce: config.debounce(),
            namespace: config.namespace.filter(|ns| !ns.is_empty()),
            exclude,
            clock: AtomicU64::new(0),
            pending: Mutex::new(FxHashMap::default()),
        }
    }

    /// Storage key for `key` under the configured namespace
    pub fn storage_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    /// Current value of the logical clock
    pub fn timestamp(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Saved values for `key`, or `None` when absent, unreadable or the
    /// storage is unavailable. A debounced snapshot not yet written wins.
    pub fn load(&self, key: &str) -> Option<Value> {
        let storage_key = self.storage_key(key);
        if let Some(pending) = self.pending.lock().get(&storage_key) {
            return Some(pending.values.clone());
        }

        let text = match self.storage.get_item(&storage_key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "failed to load snapshot");
                return None;
            }
        };

        match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => Some(Value::from(envelope.values)),
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "discarding malformed snapshot");
                None
            }
        }
    }

    /// Save a snapshot. With a debounce interval the write is deferred until
    /// [`flush_due`](Self::flush_due) or [`flush`](Self::flush).
    pub fn save(&self, key: &str, values: &Value) -> bool {
        let storage_key = self.storage_key(key);
        let filtered = self.filter(values);

        if self.debounce.is_zero() {
            return self.write(&storage_key, &filtered);
        }

        self.pending.lock().insert(
            storage_key,
            PendingSave {
                values: filtered,
                due: Instant::now() + self.debounce,
            },
        );
        true
    }

    /// Remove the saved snapshot and any pending save
    pub fn clear(&self, key: &str) -> bool {
        let storage_key = self.storage_key(key);
        self.pending.lock().remove(&storage_key);
        match self.storage.remove_item(&storage_key) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "failed to clear snapshot");
                false
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        let storage_key = self.storage_key(key);
        if self.pending.lock().contains_key(&storage_key) {
            return true;
        }
        match self.storage.get_item(&storage_key) {
            Ok(item) => item.is_some(),
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "storage unavailable");
                false
            }
        }
    }

    /// Number of debounced saves not written yet
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write every pending save now; `false` if any write failed
    pub fn flush(&self) -> bool {
        let drained: Vec<(String, PendingSave)> = self.pending.lock().drain().collect();
        drained
            .into_iter()
            .fold(true, |ok, (key, pending)| self.write(&key, &pending.values) && ok)
    }

    /// Write the pending saves whose debounce interval elapsed at `now`;
    /// returns how many were written successfully
    pub fn flush_due(&self, now: Instant) -> usize {
        let due: Vec<(String, PendingSave)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<String> = pending
                .iter()
                .filter(|(_, save)| save.due <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|save| (key, save)))
                .collect()
        };

        due.into_iter()
            .filter(|(key, save)| self.write(key, &save.values))
            .count()
    }

    /// Save `store` under `key` after every commit. Returns the global
    /// subscription; unsubscribe it to stop saving.
    pub fn bind(self: &Arc<Self>, store: &Store, key: impl Into<String>) -> SubscriptionHandle {
        let adapter = Arc::clone(self);
        let key = key.into();
        store.subscribe_path(Path::global(), move |change| {
            adapter.save(&key, &change.value);
        })
    }

    /// Merge the snapshot saved under `key` into `store` as one commit.
    ///
    /// Returns `false` when nothing usable was saved or the merge failed.
    pub fn restore(&self, store: &Store, key: &str) -> bool {
        let Some(values) = self.load(key) else {
            return false;
        };
        if values.as_object().is_none() {
            tracing::warn!(key, "saved snapshot is not an object");
            return false;
        }
        match store.set_values(values) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to restore snapshot");
                false
            }
        }
    }

    fn filter(&self, values: &Value) -> Value {
        self.exclude
            .iter()
            .fold(values.clone(), |acc, path| tree::remove(&acc, path))
    }

    fn write(&self, storage_key: &str, values: &Value) -> bool {
        let envelope = Envelope {
            values: values.to_json(),
            timestamp: self.clock.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "failed to encode snapshot");
                return false;
            }
        };

        match self.storage.set_item(storage_key, &text) {
            Ok(()) => {
                tracing::trace!(key = %storage_key, timestamp = envelope.timestamp, "snapshot saved");
                true
            }
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "failed to save snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use serde_json::json;

    fn memory_adapter(config: PersistConfig) -> (Arc<MemoryStorage>, PersistAdapter) {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = PersistAdapter::with_storage(storage.clone(), config);
        (storage, adapter)
    }

    fn envelope(storage: &MemoryStorage, key: &str) -> serde_json::Value {
        let text = storage.get_item(key).unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_save_and_load_with_namespace() {
        let (storage, adapter) = memory_adapter(PersistConfig {
            namespace: Some("app".into()),
            ..Default::default()
        });
        let values = Value::from(json!({"name": "ada", "tags": ["a"]}));

        assert!(adapter.save("form", &values));
        assert!(adapter.has("form"));
        assert!(storage.get_item("app:form").unwrap().is_some());
        assert_eq!(adapter.load("form"), Some(values));
        assert_eq!(adapter.load("other"), None);
    }

    #[test]
    fn test_envelope_and_logical_clock() {
        let (storage, adapter) = memory_adapter(PersistConfig::default());
        adapter.save("k", &Value::from(json!({"n": 1})));
        adapter.save("k", &Value::from(json!({"n": 2})));

        let saved = envelope(&storage, "k");
        assert_eq!(saved["values"], json!({"n": 2}));
        assert_eq!(saved["timestamp"], json!(2));
        assert_eq!(adapter.timestamp(), 2);
    }

    #[test]
    fn test_exclude_filter() {
        let (storage, adapter) = memory_adapter(PersistConfig {
            exclude: vec!["password".into(), "session.token".into(), "bad..path".into()],
            ..Default::default()
        });
        let values = Value::from(json!({
            "user": "ada",
            "password": "secret",
            "session": {"token": "t", "expires": 10}
        }));

        adapter.save("k", &values);
        assert_eq!(
            envelope(&storage, "k")["values"],
            json!({"user": "ada", "session": {"expires": 10}})
        );
    }

    #[test]
    fn test_unavailable_storage_degrades() {
        let (storage, adapter) = memory_adapter(PersistConfig::default());
        adapter.save("k", &Value::from(json!({"n": 1})));
        storage.set_available(false);

        assert!(!adapter.save("k", &Value::from(json!({"n": 2}))));
        assert_eq!(adapter.load("k"), None);
        assert!(!adapter.has("k"));
        assert!(!adapter.clear("k"));
    }

    #[test]
    fn test_quota_exceeded_degrades() {
        let storage = Arc::new(MemoryStorage::with_limit(16));
        let adapter = PersistAdapter::with_storage(storage.clone(), PersistConfig::default());
        assert!(!adapter.save("k", &Value::from(json!({"long": "xxxxxxxxxxxxxxxx"}))));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_is_ignored() {
        let (storage, adapter) = memory_adapter(PersistConfig::default());
        storage.set_item("k", "not json").unwrap();
        assert_eq!(adapter.load("k"), None);
    }

    #[test]
    fn test_debounced_save() {
        let (storage, adapter) = memory_adapter(PersistConfig {
            debounce_ms: 1_000,
            ..Default::default()
        });
        adapter.save("k", &Value::from(json!({"n": 1})));
        adapter.save("k", &Value::from(json!({"n": 2})));

        assert!(storage.is_empty());
        assert_eq!(adapter.pending_count(), 1);
        assert!(adapter.has("k"));
        assert_eq!(adapter.load("k"), Some(Value::from(json!({"n": 2}))));

        assert_eq!(adapter.flush_due(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(adapter.flush_due(later), 1);
        assert_eq!(envelope(&storage, "k")["values"], json!({"n": 2}));
        assert_eq!(adapter.timestamp(), 1);
    }

    #[test]
    fn test_flush_writes_everything() {
        let (storage, adapter) = memory_adapter(PersistConfig {
            debounce_ms: 60_000,
            ..Default::default()
        });
        adapter.save("a", &Value::from(json!({"n": 1})));
        adapter.save("b", &Value::from(json!({"n": 2})));

        assert!(adapter.flush());
        assert_eq!(storage.len(), 2);
        assert_eq!(adapter.pending_count(), 0);
    }

    #[test]
    fn test_clear_drops_pending_and_saved() {
        let (_storage, adapter) = memory_adapter(PersistConfig {
            debounce_ms: 60_000,
            ..Default::default()
        });
        adapter.save("k", &Value::from(json!({"n": 1})));
        assert!(adapter.clear("k"));
        assert!(!adapter.has("k"));
        assert_eq!(adapter.pending_count(), 0);
    }

    #[test]
    fn test_bind_saves_every_commit() {
        let (storage, adapter) = memory_adapter(PersistConfig {
            exclude: vec!["draft".into()],
            ..Default::default()
        });
        let adapter = Arc::new(adapter);
        let store = Store::new(json!({"count": 0, "draft": "x"}));

        let handle = adapter.bind(&store, "counter");
        store.set_value("count", 1).unwrap();
        assert_eq!(envelope(&storage, "counter")["values"], json!({"count": 1}));

        handle.unsubscribe();
        store.set_value("count", 2).unwrap();
        assert_eq!(envelope(&storage, "counter")["values"], json!({"count": 1}));
    }

    #[test]
    fn test_restore_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PersistAdapter::new(
            FileStorage::new(dir.path()).unwrap(),
            PersistConfig {
                namespace: Some("app".into()),
                ..Default::default()
            },
        );
        adapter.save("form", &Value::from(json!({"name": "grace", "tags": ["x", "y"]})));

        let store = Store::new(json!({"name": "", "tags": [], "dirty": false}));
        assert!(adapter.restore(&store, "form"));
        assert_eq!(
            store.get_values().to_json(),
            json!({"name": "grace", "tags": ["x", "y"], "dirty": false})
        );
        assert!(!adapter.restore(&store, "missing"));
    }
}
