//! Named actions bound to a store
//!
//! An action is a callable receiving an [`ActionContext`] (store accessors
//! plus a handle for calling sibling actions) and its arguments. Actions are
//! resolved by name at call time, so registering or overriding an action is
//! visible to every context created before.
//!
//! Local overrides are layered on top of the shared table with
//! [`Actions::with_overrides`]; the shared table itself is never mutated by
//! them.

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Action callable
pub type Action = Arc<dyn Fn(&ActionContext, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Ordered name → action table
#[derive(Clone, Default)]
pub struct ActionMap {
    entries: IndexMap<String, Action>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&ActionContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, action);
        self
    }

    /// Insert or replace an action, returning the previous one
    pub fn insert<F>(&mut self, name: impl Into<String>, action: F) -> Option<Action>
    where
        F: Fn(&ActionContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(action))
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self`; on a name collision `other` wins
    pub fn merge(mut self, other: ActionMap) -> Self {
        for (name, action) in other.entries {
            self.entries.insert(name, action);
        }
        self
    }

    /// Merge several tables left to right, last definition wins
    pub fn merge_all<I>(maps: I) -> Self
    where
        I: IntoIterator<Item = ActionMap>,
    {
        maps.into_iter().fold(ActionMap::new(), ActionMap::merge)
    }
}

impl fmt::Debug for ActionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Layered dispatch table
///
/// The first layer has the highest priority. Layers are shared: cloning an
/// `Actions` does not copy the tables.
#[derive(Clone)]
pub struct Actions {
    layers: SmallVec<[Arc<RwLock<ActionMap>>; 2]>,
}

impl Actions {
    pub fn new(map: ActionMap) -> Self {
        let mut layers = SmallVec::new();
        layers.push(Arc::new(RwLock::new(map)));
        Self { layers }
    }

    /// New view with `local` shadowing every existing layer
    pub fn with_overrides(&self, local: ActionMap) -> Actions {
        let mut layers = SmallVec::with_capacity(self.layers.len() + 1);
        layers.push(Arc::new(RwLock::new(local)));
        layers.extend(self.layers.iter().cloned());
        Actions { layers }
    }

    /// Register an action in the top layer
    pub fn register<F>(&self, name: impl Into<String>, action: F)
    where
        F: Fn(&ActionContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if let Some(top) = self.layers.first() {
            top.write().insert(name, action);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Action> {
        self.layers
            .iter()
            .find_map(|layer| layer.read().get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer.read().contains(name))
    }

    /// Visible action names, highest priority layer first, without duplicates
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for layer in &self.layers {
            for name in layer.read().names() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.read().is_empty())
    }

    fn invoke(&self, context: &ActionContext, name: &str, args: &[Value]) -> Result<Value> {
        let action = self
            .lookup(name)
            .ok_or_else(|| StoreError::UnknownAction(name.to_string()))?;

        tracing::trace!(action = name, args = args.len(), "calling action");
        action(context, args).map_err(|source| StoreError::ActionFailed {
            name: name.to_string(),
            source,
        })
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actions")
            .field("layers", &self.layers.len())
            .field("names", &self.names())
            .finish()
    }
}

/// What an action or watcher sees: the store's accessors and the dispatch
/// table it was called through
#[derive(Clone, Debug)]
pub struct ActionContext {
    store: Store,
    actions: Actions,
}

impl ActionContext {
    pub fn new(store: Store, actions: Actions) -> Self {
        Self { store, actions }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    /// Snapshot of the whole tree
    pub fn values(&self) -> Value {
        self.store.get_values()
    }

    pub fn get_value(&self, path: &str) -> Result<Value> {
        self.store.get_value(path)
    }

    pub fn set_value(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.store.set_value(path, value)
    }

    pub fn set_values(&self, partial: impl Into<Value>) -> Result<()> {
        self.store.set_values(partial)
    }

    pub fn set_batch<I, K, V>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.store.set_batch(updates)
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }

    /// Call an action through this context's dispatch table, so sibling
    /// calls see the same overrides
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.actions.invoke(self, name, args)
    }
}
