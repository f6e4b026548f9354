//! Key/value storage backends

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// String-keyed, string-valued storage medium
pub trait KeyValueStorage: Send + Sync {
    /// Read an item; a missing key is `Ok(None)`
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove an item; removing a missing key succeeds
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-process storage, optionally capped to emulate a quota
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<FxHashMap<String, String>>,
    /// Maximum total bytes of keys plus values
    limit: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage refusing writes that would exceed `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Make every operation fail with [`StorageError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.disabled.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Bytes currently used
    pub fn used(&self) -> usize {
        self.items
            .lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn check_available(&self) -> Result<()> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut items = self.items.lock();

        if let Some(limit) = self.limit {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let requested = key.len() + value.len();
            if used + requested > limit {
                return Err(StorageError::QuotaExceeded {
                    used,
                    limit,
                    requested,
                });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.items.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`; characters outside `[A-Za-z0-9._-]` are
    /// percent-encoded so namespaced keys stay portable
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".into()));
        }

        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => name.push(byte as char),
                b'.' if !name.is_empty() => name.push('.'),
                _ => name.push_str(&format!("%{byte:02X}")),
            }
        }
        name.push_str(".json");
        Ok(self.dir.join(name))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);

        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));

        storage.remove_item("k").unwrap();
        storage.remove_item("k").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_memory_quota() {
        let storage = MemoryStorage::with_limit(10);
        storage.set_item("a", "1234").unwrap();

        let err = storage.set_item("b", "123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 10, .. }));

        // Replacing an item only counts its new size.
        storage.set_item("a", "123456789").unwrap();
        assert_eq!(storage.used(), 10);
    }

    #[test]
    fn test_memory_unavailable() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        assert!(matches!(
            storage.set_item("k", "v"),
            Err(StorageError::Unavailable(_))
        ));
        storage.set_available(true);
        storage.set_item("k", "v").unwrap();
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state")).unwrap();

        storage.set_item("app:form", "{\"a\":1}").unwrap();
        assert_eq!(
            storage.get_item("app:form").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(storage.path_for("app:form").unwrap().exists());

        storage.remove_item("app:form").unwrap();
        assert_eq!(storage.get_item("app:form").unwrap(), None);
        storage.remove_item("app:form").unwrap();
    }

    #[test]
    fn test_file_names_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let path = storage.path_for("ns:../x").unwrap();
        assert_eq!(path.file_name().unwrap(), "ns%3A..%2Fx.json");
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(matches!(
            storage.path_for(""),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
