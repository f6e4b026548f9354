//! The store handle and its commit scheduler
//!
//! A [`Store`] owns one value tree, one subscription registry, a dispatch
//! table of actions and a set of watchers. Every write goes through a
//! commit:
//!
//! 1. all writes are applied to one working copy of the tree
//! 2. each write is diffed against the pre-commit snapshot and the changed
//!    paths are unioned
//! 3. the affected listeners run, once per `(listener, concrete path)`
//! 4. the affected watchers run; their failures are collected and returned
//!    after everything else ran
//!
//! Writes issued from inside a listener, watcher or action while a commit is
//! being delivered are queued and run as separate commits, in order, before
//! the outer call returns. Commits from other threads wait for the current
//! drain to finish.
//!
//! # Example
//!
//! ```
//! use fieldstore_core::{Store, Value};
//! use serde_json::json;
//!
//! let store = Store::new(Value::from(json!({"user": {"name": "ada"}})));
//!
//! let handle = store
//!     .subscribe("user", |change| println!("user is now {}", change.value))
//!     .unwrap();
//!
//! store.set_value("user.name", "grace").unwrap();
//! assert_eq!(store.get_value("user.name").unwrap(), Value::from("grace"));
//!
//! handle.unsubscribe();
//! ```

use crate::actions::{ActionContext, ActionMap, Actions};
use crate::config::StoreConfig;
use crate::diff;
use crate::error::{Result, StoreError, WatchFailure, WatchFailures};
use crate::path::{Path, Segment};
use crate::registry::{self, FieldChange, ListenerId, Notification, SubscriptionRegistry};
use crate::tree;
use crate::value::Value;
use crate::watch::{WatchConfig, WatchInvocation, WatchRuntime};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// One path write of a commit
pub type Update = (Path, Value);

/// Builder for a [`Store`]
pub struct StoreBuilder {
    initial: Value,
    config: StoreConfig,
    actions: ActionMap,
    watch: WatchConfig,
}

impl StoreBuilder {
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            initial: initial.into(),
            config: StoreConfig::default(),
            actions: ActionMap::new(),
            watch: WatchConfig::new(),
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Register actions; repeated calls merge, later names win
    pub fn actions(mut self, actions: ActionMap) -> Self {
        self.actions = std::mem::take(&mut self.actions).merge(actions);
        self
    }

    pub fn watch(mut self, watch: WatchConfig) -> Self {
        self.watch = self.watch.extend(watch);
        self
    }

    /// Build the store; fails if a watch pattern is malformed
    pub fn build(self) -> Result<Store> {
        let watch = WatchRuntime::from_config(self.watch)?;
        Ok(Store::from_parts(self.initial, self.config, self.actions, watch))
    }
}

/// Shared handle to a store (cheap to clone)
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    /// Held for a whole drain; `true` while notifications are delivered
    commit_gate: ReentrantMutex<Cell<bool>>,
    actions: Actions,
    config: StoreConfig,
}

struct StoreState {
    root: Value,
    /// Original values, restored by `reset`
    seed: Value,
    registry: SubscriptionRegistry,
    watch: WatchRuntime,
    /// Pending commits (FIFO)
    queue: VecDeque<Vec<Update>>,
    commit_count: u64,
    destroyed: bool,
}

/// Everything a commit has to deliver once the tree is updated
struct CommitPass {
    notifications: Vec<Notification>,
    watches: Vec<WatchInvocation>,
}

impl StoreState {
    fn apply(&mut self, writes: Vec<Update>, config: &StoreConfig) -> Result<Option<CommitPass>> {
        let old_root = self.root.clone();
        let new_root = tree::set_many(&old_root, writes.iter().map(|(p, v)| (p, v)))?;
        let changed = diff::changed_paths(
            &old_root,
            &new_root,
            writes.iter().map(|(p, _)| p),
            config.equality,
        );

        self.root = new_root.clone();
        self.commit_count += 1;

        if changed.is_empty() {
            tracing::trace!(commit = self.commit_count, writes = writes.len(), "commit changed nothing");
            return Ok(None);
        }

        let notifications = self.registry.collect(&changed, &old_root, &new_root);
        let affected = registry::with_ancestors(&changed);
        let watches = self.watch.collect(&affected, &old_root, &new_root);

        tracing::trace!(
            commit = self.commit_count,
            writes = writes.len(),
            changed = changed.len(),
            notifications = notifications.len(),
            watches = watches.len(),
            "commit applied"
        );

        Ok(Some(CommitPass {
            notifications,
            watches,
        }))
    }
}

/// Clears the delivering flag when a drain ends, even by unwinding
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Store {
    /// Create a store seeded with `initial`
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::from_parts(
            initial.into(),
            StoreConfig::default(),
            ActionMap::new(),
            WatchRuntime::new(),
        )
    }

    fn from_parts(seed: Value, config: StoreConfig, actions: ActionMap, watch: WatchRuntime) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    root: seed.clone(),
                    seed,
                    registry: SubscriptionRegistry::new(),
                    watch,
                    queue: VecDeque::new(),
                    commit_count: 0,
                    destroyed: false,
                }),
                commit_gate: ReentrantMutex::new(Cell::new(false)),
                actions: Actions::new(actions),
                config,
            }),
        }
    }

    pub fn builder(initial: impl Into<Value>) -> StoreBuilder {
        StoreBuilder::new(initial)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read the value at a dot path; absent paths read as `Undefined`
    pub fn get_value(&self, path: &str) -> Result<Value> {
        Ok(self.get(&Path::parse(path)?))
    }

    /// Read the value at a parsed path
    pub fn get(&self, path: &Path) -> Value {
        tree::get(&self.inner.state.lock().root, path)
    }

    /// Snapshot of the whole tree
    pub fn get_values(&self) -> Value {
        self.inner.state.lock().root.clone()
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write one path as a single commit
    pub fn set_value(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let path = Path::parse_write(path)?;
        self.commit(vec![(path, value.into())])
    }

    /// Merge the top-level keys of `partial`, one write per key, as one commit
    pub fn set_values(&self, partial: impl Into<Value>) -> Result<()> {
        let partial = partial.into();
        let Value::Object(map) = &partial else {
            return Err(StoreError::InvalidValue(format!(
                "set_values expects an object, got {}",
                partial.type_name()
            )));
        };
        let writes = map
            .iter()
            .map(|(key, value)| (Path::from_segments([Segment::from_key(key)]), value.clone()))
            .collect();
        self.commit(writes)
    }

    /// Write any number of dot paths as one commit.
    ///
    /// Every path is validated before anything is applied.
    pub fn set_batch<I, K, V>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let writes = updates
            .into_iter()
            .map(|(path, value)| Ok((Path::parse_write(path.as_ref())?, value.into())))
            .collect::<Result<Vec<_>>>()?;
        self.commit(writes)
    }

    /// Restore the tree to the values the store was created with
    pub fn reset(&self) -> Result<()> {
        let seed = self.inner.state.lock().seed.clone();
        self.commit(vec![(Path::root(), seed)])
    }

    /// Apply `writes` as one commit and deliver its notifications.
    ///
    /// Called while this thread is already delivering a commit, the writes are
    /// queued and `Ok(())` is returned immediately; they run right after the
    /// current commit. Watch failures of every commit drained by this call are
    /// returned together as [`StoreError::WatchCallback`].
    pub fn commit(&self, writes: Vec<Update>) -> Result<()> {
        let gate = self.inner.commit_gate.lock();
        {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(StoreError::Destroyed);
            }
            state.queue.push_back(writes);
        }

        if gate.get() {
            tracing::debug!("commit requested during delivery; queued");
            return Ok(());
        }

        gate.set(true);
        let _drain = DrainGuard(&*gate);
        self.drain()
    }

    fn drain(&self) -> Result<()> {
        let mut failures = Vec::new();
        let mut first_error = None;

        loop {
            let step = {
                let mut state = self.inner.state.lock();
                let Some(writes) = state.queue.pop_front() else {
                    break;
                };
                state.apply(writes, &self.inner.config)
            };

            match step {
                Ok(Some(pass)) => self.deliver(pass, &mut failures),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "commit rejected");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::WatchCallback(WatchFailures(failures)))
        }
    }

    fn deliver(&self, pass: CommitPass, failures: &mut Vec<WatchFailure>) {
        for notification in pass.notifications {
            // Skip listeners removed by an earlier listener of this pass.
            if !self.inner.state.lock().registry.contains(notification.listener) {
                continue;
            }
            (notification.callback)(&notification.change);
        }

        if pass.watches.is_empty() {
            return;
        }

        let context = ActionContext::new(self.clone(), self.inner.actions.clone());
        for watch in pass.watches {
            if let Err(error) = (watch.callback)(&context, &watch.value, &watch.previous) {
                tracing::warn!(
                    pattern = %watch.pattern,
                    path = %watch.path,
                    error = %error,
                    "watch callback failed"
                );
                failures.push(WatchFailure {
                    pattern: watch.pattern,
                    path: watch.path.to_string(),
                    error,
                });
            }
        }
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscribe to a path, a wildcard pattern, or `*` for every commit.
    ///
    /// The listener stays registered until it is explicitly unsubscribed.
    pub fn subscribe<F>(&self, pattern: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        let pattern = Path::parse_pattern(pattern)?;
        Ok(self.subscribe_path(pattern, listener))
    }

    /// Subscribe with an already parsed pattern
    pub fn subscribe_path<F>(&self, pattern: Path, listener: F) -> SubscriptionHandle
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .state
            .lock()
            .registry
            .subscribe(pattern.clone(), Arc::new(listener));
        SubscriptionHandle {
            id,
            pattern,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription; repeated calls are no-ops
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.state.lock().registry.unsubscribe(handle.id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Register a watcher after construction
    pub fn watch<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&ActionContext, &Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.state.lock().watch.add(pattern, Arc::new(callback))
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// The store's dispatch table
    pub fn actions(&self) -> &Actions {
        &self.inner.actions
    }

    /// Context bound to the store's own actions
    pub fn context(&self) -> ActionContext {
        ActionContext::new(self.clone(), self.inner.actions.clone())
    }

    /// Context whose `local` actions shadow the store's for this caller only
    pub fn context_with(&self, local: ActionMap) -> ActionContext {
        ActionContext::new(self.clone(), self.inner.actions.with_overrides(local))
    }

    /// Call a registered action by name
    pub fn call_action(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.context().call(name, args)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Tear the store down: listeners and watchers are dropped and further
    /// writes fail with [`StoreError::Destroyed`]. Reads keep working.
    pub fn destroy(&self) {
        let mut state = self.inner.state.lock();
        state.destroyed = true;
        state.registry.clear();
        state.watch.clear();
        state.queue.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Do both handles point to the same store instance?
    pub fn ptr_eq(a: &Store, b: &Store) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.inner.state.lock();
        StoreStats {
            listener_count: state.registry.len(),
            field_count: state.registry.field_count(),
            watch_count: state.watch.len(),
            action_count: self.inner.actions.len(),
            commit_count: state.commit_count,
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("Store")
            .field("listeners", &stats.listener_count)
            .field("watchers", &stats.watch_count)
            .field("actions", &stats.action_count)
            .field("commits", &stats.commit_count)
            .finish()
    }
}

/// Statistics about a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub listener_count: usize,
    /// Concrete paths with at least one listener
    pub field_count: usize,
    pub watch_count: usize,
    pub action_count: usize,
    pub commit_count: u64,
}

/// Handle for removing a subscription
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: ListenerId,
    pattern: Path,
    store: Weak<StoreInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn pattern(&self) -> &Path {
        &self.pattern
    }

    /// Remove the listener. Returns `false` if it was already removed or the
    /// store no longer exists.
    pub fn unsubscribe(&self) -> bool {
        match self.store.upgrade() {
            Some(inner) => inner.state.lock().registry.unsubscribe(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<(String, serde_json::Value, serde_json::Value)>>>;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn recorder(store: &Store, pattern: &str) -> Log {
        let log: Log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = log.clone();
        store
            .subscribe(pattern, move |change: &FieldChange| {
                log_clone.lock().unwrap().push((
                    change.path.to_string(),
                    change.value.to_json(),
                    change.previous.to_json(),
                ));
            })
            .unwrap();
        log
    }

    fn count(log: &Log) -> usize {
        log.lock().unwrap().len()
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let store = Store::new(json!({}));
        let nested = v(json!({"tags": ["a", "b"], "meta": {"n": 1}}));
        store.set_value("doc", nested.clone()).unwrap();
        assert_eq!(store.get_value("doc").unwrap(), nested);

        store.set_value("list", v(json!([1, [2, 3]]))).unwrap();
        assert_eq!(store.get_value("list.1.0").unwrap(), Value::from(2));
    }

    #[test]
    fn test_invalid_path_surfaces_immediately() {
        let store = Store::new(json!({}));
        assert!(matches!(
            store.set_value("a..b", 1),
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.get_value(".a"),
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(store.subscribe("", |_| {}).is_err());
    }

    #[test]
    fn test_idempotent_write_does_not_notify() {
        let store = Store::new(json!({"p": {"x": 1}, "n": 1}));
        let object_log = recorder(&store, "p");
        let scalar_log = recorder(&store, "n");

        let value = v(json!({"x": 2}));
        store.set_value("p", value.clone()).unwrap();
        store.set_value("p", value).unwrap();
        assert_eq!(count(&object_log), 1);

        store.set_value("n", 5).unwrap();
        store.set_value("n", 5).unwrap();
        assert_eq!(count(&scalar_log), 1);
    }

    #[test]
    fn test_ancestor_bubbling() {
        let store = Store::new(json!({"a": {"b": 0}}));
        let log = recorder(&store, "a");

        store.set_value("a.b", 1).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "a");
        assert_eq!(log[0].1, json!({"b": 1}));
        assert_eq!(log[0].2, json!({"b": 0}));
    }

    #[test]
    fn test_descendant_notified_on_parent_replace() {
        let store = Store::new(json!({}));
        let log = recorder(&store, "a.b");

        store.set_value("a", v(json!({"b": 1}))).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].1, json!(1));
    }

    #[test]
    fn test_wildcard_single_toggle() {
        let store = Store::new(json!({"todos": [{"completed": false}, {"completed": false}]}));
        let log = recorder(&store, "todos.*.completed");

        store.set_value("todos.0.completed", true).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![("todos.0.completed".to_string(), json!(true), json!(false))]
        );
    }

    #[test]
    fn test_wildcard_batch_fires_per_index() {
        let store = Store::new(json!({"todos": [
            {"completed": false}, {"completed": false}, {"completed": false}
        ]}));
        let wildcard = recorder(&store, "todos.*.completed");
        let ancestor = recorder(&store, "todos");

        store
            .set_batch([("todos.0.completed", true), ("todos.2.completed", true)])
            .unwrap();

        let paths: Vec<String> = wildcard.lock().unwrap().iter().map(|e| e.0.clone()).collect();
        assert_eq!(paths, vec!["todos.0.completed", "todos.2.completed"]);
        assert_eq!(count(&ancestor), 1);
        assert_eq!(store.stats().commit_count, 1);
    }

    #[test]
    fn test_array_replacement_minimal_notifications() {
        let items: Vec<serde_json::Value> = (0..100).map(|i| json!({"v": i})).collect();
        let store = Store::new(json!({ "arr": items.clone() }));

        let index_logs: Vec<Log> = (0..100)
            .map(|i| recorder(&store, &format!("arr.{i}.v")))
            .collect();
        let array_log = recorder(&store, "arr");
        let length_log = recorder(&store, "arr.length");

        let mut replaced = items;
        replaced[3] = json!({"v": 999});
        store.set_value("arr", v(json!(replaced))).unwrap();

        for (i, log) in index_logs.iter().enumerate() {
            assert_eq!(count(log), usize::from(i == 3), "index {i}");
        }
        assert_eq!(count(&array_log), 1);
        assert_eq!(count(&length_log), 0);
    }

    #[test]
    fn test_length_virtual_path() {
        let store = Store::new(json!({}));
        assert_eq!(
            store.get_value("missingArray.length").unwrap(),
            Value::from(0usize)
        );

        let log = recorder(&store, "arr.length");
        store.set_value("arr", v(json!([1, 2, 3]))).unwrap();
        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].1, json!(3));
        }

        store.set_value("arr", v(json!([4, 5, 6]))).unwrap();
        assert_eq!(count(&log), 1);
    }

    #[test]
    fn test_append_by_index_notifies_length() {
        let store = Store::new(json!({"todos": [{"title": "a"}]}));
        let length = recorder(&store, "todos.length");

        store.set_value("todos.1", v(json!({"title": "b"}))).unwrap();
        {
            let log = length.lock().unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].1, json!(2));
            assert_eq!(log[0].2, json!(1));
        }

        store.set_value("todos.0.title", "z").unwrap();
        assert_eq!(count(&length), 1);

        store.set_value("fresh.2", 1).unwrap();
        assert_eq!(store.get_value("fresh.length").unwrap(), Value::from(3usize));
    }

    #[test]
    fn test_nested_length_follows_parent_replacement() {
        let store = Store::new(json!({}));
        let length = recorder(&store, "doc.items.length");

        store.set_value("doc", v(json!({"items": [1, 2, 3]}))).unwrap();
        store.set_value("doc", 5).unwrap();

        let values: Vec<serde_json::Value> =
            length.lock().unwrap().iter().map(|e| e.1.clone()).collect();
        assert_eq!(values, vec![json!(3), json!(0)]);
    }

    #[test]
    fn test_wildcard_child_ignores_length() {
        let store = Store::new(json!({"todos": [{"title": "a"}]}));
        let children = recorder(&store, "todos.*");

        store
            .set_value("todos", v(json!([{"title": "a"}, {"title": "b"}])))
            .unwrap();

        let paths: Vec<String> = children.lock().unwrap().iter().map(|e| e.0.clone()).collect();
        assert_eq!(paths, vec!["todos.1"]);
    }

    #[test]
    fn test_reset_restores_arrays() {
        let store = Store::new(json!({"empty": [], "full": [1, 2], "name": "x"}));
        store.set_value("empty", v(json!(["added"]))).unwrap();
        store.set_value("full", "").unwrap();
        store.set_value("name", "y").unwrap();

        store.reset().unwrap();

        assert_eq!(store.get_value("empty").unwrap(), v(json!([])));
        assert!(store.get_value("empty").unwrap().as_array().is_some());
        assert_eq!(store.get_value("full").unwrap(), v(json!([1, 2])));
        assert_eq!(store.get_value("name").unwrap(), Value::from("x"));
    }

    #[test]
    fn test_set_values_merges_top_level() {
        let store = Store::new(json!({"a": 1, "b": {"c": 2}}));
        let global = recorder(&store, "*");

        store.set_values(v(json!({"a": 10, "d": true}))).unwrap();

        assert_eq!(
            store.get_values().to_json(),
            json!({"a": 10, "b": {"c": 2}, "d": true})
        );
        assert_eq!(count(&global), 1);
        assert!(matches!(
            store.set_values(Value::from(3)),
            Err(StoreError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_batch_is_atomic_for_observers() {
        let store = Store::new(json!({"a": 0, "b": 0}));
        let observed = Arc::new(StdMutex::new(Vec::new()));
        let observed_clone = observed.clone();
        let reader = store.clone();
        store
            .subscribe("a", move |_| {
                let b = reader.get_value("b").unwrap();
                observed_clone.lock().unwrap().push(b.to_json());
            })
            .unwrap();

        store.set_batch([("a", 1), ("b", 2)]).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![json!(2)]);
    }

    #[test]
    fn test_batch_with_invalid_path_applies_nothing() {
        let store = Store::new(json!({"a": 0}));
        assert!(store.set_batch([("a", 1), ("b..c", 2)]).is_err());
        assert_eq!(store.get_value("a").unwrap(), Value::from(0));
    }

    #[test]
    fn test_reentrant_write_runs_as_next_commit() {
        let store = Store::new(json!({"count": 0, "doubled": 0}));
        let writer = store.clone();
        store
            .subscribe("count", move |change| {
                let n = change.value.as_i64().unwrap_or(0);
                // Queued: the current commit is still being delivered.
                writer.set_value("doubled", n * 2).unwrap();
                assert_eq!(writer.get_value("doubled").unwrap(), Value::from(0));
            })
            .unwrap();
        let doubled = recorder(&store, "doubled");

        store.set_value("count", 4).unwrap();

        assert_eq!(store.get_value("doubled").unwrap(), Value::from(8));
        assert_eq!(count(&doubled), 1);
        assert_eq!(store.stats().commit_count, 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = Store::new(json!({"a": 0}));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handle = store
            .subscribe("a", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        store.set_value("a", 1).unwrap();
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert!(!store.unsubscribe(&handle));
        store.set_value("a", 2).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listener_removed_mid_pass_is_skipped() {
        let store = Store::new(json!({"a": 0}));
        let calls = Arc::new(AtomicUsize::new(0));

        let victim_slot: Arc<StdMutex<Option<SubscriptionHandle>>> = Arc::new(StdMutex::new(None));
        let slot = victim_slot.clone();
        store
            .subscribe("a", move |_| {
                if let Some(handle) = slot.lock().unwrap().as_ref() {
                    handle.unsubscribe();
                }
            })
            .unwrap();
        let calls_clone = calls.clone();
        let victim = store
            .subscribe("a", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        *victim_slot.lock().unwrap() = Some(victim);

        store.set_value("a", 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_global_listener_receives_whole_tree() {
        let store = Store::new(json!({"a": 1}));
        let log = recorder(&store, "*");
        store.set_value("b.c", 2).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "");
        assert_eq!(log[0].1, json!({"a": 1, "b": {"c": 2}}));
        assert_eq!(log[0].2, json!({"a": 1}));
    }

    #[test]
    fn test_destroyed_store_rejects_writes() {
        let store = Store::new(json!({"a": 1}));
        let _log = recorder(&store, "a");
        store.destroy();

        assert!(store.is_destroyed());
        assert!(matches!(store.set_value("a", 2), Err(StoreError::Destroyed)));
        assert_eq!(store.listener_count(), 0);
        assert_eq!(store.get_value("a").unwrap(), Value::from(1));
    }

    #[test]
    fn test_structural_equality_mode() {
        let store = Store::builder(json!({"p": {"x": 1}}))
            .config(StoreConfig {
                equality: crate::config::EqualityMode::Structural,
            })
            .build()
            .unwrap();
        let log = recorder(&store, "p");

        store.set_value("p", v(json!({"x": 1}))).unwrap();
        assert_eq!(count(&log), 0);
        store.set_value("p", v(json!({"x": 2}))).unwrap();
        assert_eq!(count(&log), 1);
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let store = Store::new(json!({"n": 0}));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        store
            .subscribe("*", move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.set_value(&format!("slot{i}"), i as i64).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(seen.load(Ordering::SeqCst), 8);
        for i in 0..8 {
            assert_eq!(
                store.get_value(&format!("slot{i}")).unwrap(),
                Value::from(i as i64)
            );
        }
    }
}
