//! Shared stores keyed by identifier
//!
//! A [`StoreRegistry`] maps identifiers to lazily created stores plus a
//! reference count, so independent call sites can attach to one logical
//! store. The registry is an ordinary value: create one per process (or per
//! test) and pass it to whoever needs it.
//!
//! Under [`CleanupPolicy::Auto`] the store is destroyed once the last
//! attachment detaches and the grace window elapsed without a reattach.
//! Under [`CleanupPolicy::Manual`] it lives as long as the registry.
//!
//! Teardown is deferred rather than timer driven: an expired store is reaped
//! by the next registry operation touching it, or by
//! [`StoreRegistry::reap_expired`].
//!
//! ```
//! use fieldstore_core::{StoreRegistry, Value};
//! use serde_json::json;
//!
//! let registry = StoreRegistry::new();
//! let a = registry.get_or_create("session", json!({"user": null}));
//! let b = registry.get_or_create("session", json!({"ignored": true}));
//! assert!(fieldstore_core::Store::ptr_eq(&a, &b));
//! ```

use crate::config::RegistryConfig;
use crate::error::{Result, StoreError};
use crate::store::{Store, StoreBuilder};
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Lifetime policy of a shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Destroyed after the last detach (and the grace window)
    Auto,
    /// Kept for the life of the registry
    Manual,
}

impl CleanupPolicy {
    pub fn from_auto_cleanup(auto_cleanup: bool) -> Self {
        if auto_cleanup {
            CleanupPolicy::Auto
        } else {
            CleanupPolicy::Manual
        }
    }

    fn describe(self) -> &'static str {
        match self {
            CleanupPolicy::Auto => "auto",
            CleanupPolicy::Manual => "manual",
        }
    }
}

struct SharedEntry {
    store: Store,
    ref_count: usize,
    /// Fixed by the first attach
    policy: Option<CleanupPolicy>,
    /// Set when the count dropped to zero under `Auto`
    teardown_at: Option<Instant>,
}

impl SharedEntry {
    fn new(store: Store) -> Self {
        Self {
            store,
            ref_count: 0,
            policy: None,
            teardown_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.teardown_at, Some(deadline) if deadline <= now)
    }
}

/// Table of shared stores
pub struct StoreRegistry {
    entries: Mutex<FxHashMap<String, SharedEntry>>,
    grace: Duration,
}

impl StoreRegistry {
    /// Registry with the default grace window
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            grace: config.cleanup_grace(),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Return the store for `id`, creating it from `initial` if needed.
    ///
    /// The first caller's seed wins; later seeds are ignored.
    pub fn get_or_create(&self, id: &str, initial: impl Into<Value>) -> Store {
        let initial = initial.into();
        self.get_or_insert(id, || Store::new(initial))
    }

    /// Like [`get_or_create`](Self::get_or_create) but the store is built by
    /// `build` (actions, watchers, config) when it does not exist yet.
    pub fn get_or_create_with<F>(&self, id: &str, build: F) -> Result<Store>
    where
        F: FnOnce() -> StoreBuilder,
    {
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        if let Some(entry) = entries.get(id) {
            return Ok(entry.store.clone());
        }

        let store = build().build()?;
        tracing::debug!(id, "created shared store");
        entries.insert(id.to_string(), SharedEntry::new(store.clone()));
        Ok(store)
    }

    fn get_or_insert(&self, id: &str, create: impl FnOnce() -> Store) -> Store {
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        entries
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(id, "created shared store");
                SharedEntry::new(create())
            })
            .store
            .clone()
    }

    /// The live store for `id`, if any
    pub fn get(&self, id: &str) -> Option<Store> {
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        entries.get(id).map(|entry| entry.store.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Register one more user of `id`; returns the new count.
    ///
    /// The first attach fixes the cleanup policy; attaching with the other
    /// policy fails with [`StoreError::IdentifierConflict`]. A reattach
    /// inside the grace window cancels the pending teardown.
    pub fn attach(&self, id: &str, auto_cleanup: bool) -> Result<usize> {
        let requested = CleanupPolicy::from_auto_cleanup(auto_cleanup);
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownStore(id.to_string()))?;

        check_policy(id, entry, requested)?;
        entry.policy = Some(requested);
        entry.ref_count += 1;
        if entry.teardown_at.take().is_some() {
            tracing::debug!(id, "reattached within grace window; teardown cancelled");
        }
        Ok(entry.ref_count)
    }

    /// Release one user of `id`; returns the remaining count.
    ///
    /// Detaching at zero is a no-op. When the count reaches zero under the
    /// auto policy the store is scheduled for teardown after the grace
    /// window, or torn down right away when the window is zero.
    pub fn detach(&self, id: &str, auto_cleanup: bool) -> Result<usize> {
        let requested = CleanupPolicy::from_auto_cleanup(auto_cleanup);
        let now = Instant::now();
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, now);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownStore(id.to_string()))?;

        check_policy(id, entry, requested)?;
        if entry.ref_count == 0 {
            return Ok(0);
        }

        entry.ref_count -= 1;
        let remaining = entry.ref_count;
        if remaining == 0 && requested == CleanupPolicy::Auto {
            if self.grace.is_zero() {
                teardown(&mut entries, id);
            } else {
                entry.teardown_at = Some(now + self.grace);
                tracing::debug!(id, grace_ms = self.grace.as_millis() as u64, "teardown scheduled");
            }
        }
        Ok(remaining)
    }

    /// Tear down every store whose grace window has elapsed; returns how many
    pub fn reap_expired(&self) -> usize {
        self.reap_expired_at(Instant::now())
    }

    pub fn reap_expired_at(&self, now: Instant) -> usize {
        reap_all(&mut self.entries.lock(), now)
    }

    pub fn ref_count(&self, id: &str) -> Option<usize> {
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        entries.get(id).map(|entry| entry.ref_count)
    }

    /// Does `id` have a teardown pending?
    pub fn is_pending_teardown(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        reap_if_expired(&mut entries, id, Instant::now());
        entries
            .get(id)
            .is_some_and(|entry| entry.teardown_at.is_some())
    }

    /// Number of live stores; expired ones are reaped first
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        reap_all(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy and forget every store
    pub fn clear(&self) {
        let drained: Vec<SharedEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.store.destroy();
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_policy(id: &str, entry: &SharedEntry, requested: CleanupPolicy) -> Result<()> {
    match entry.policy {
        Some(existing) if existing != requested => Err(StoreError::IdentifierConflict {
            id: id.to_string(),
            existing: existing.describe(),
            requested: requested.describe(),
        }),
        _ => Ok(()),
    }
}

fn reap_if_expired(entries: &mut FxHashMap<String, SharedEntry>, id: &str, now: Instant) {
    if entries.get(id).is_some_and(|entry| entry.is_expired(now)) {
        teardown(entries, id);
    }
}

fn reap_all(entries: &mut FxHashMap<String, SharedEntry>, now: Instant) -> usize {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| entry.is_expired(now))
        .map(|(id, _)| id.clone())
        .collect();
    for id in &expired {
        teardown(entries, id);
    }
    expired.len()
}

fn teardown(entries: &mut FxHashMap<String, SharedEntry>, id: &str) {
    if let Some(entry) = entries.remove(id) {
        entry.store.destroy();
        tracing::debug!(id, "shared store torn down");
    }
}
