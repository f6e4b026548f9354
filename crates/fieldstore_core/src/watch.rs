//! Path watchers
//!
//! A watcher is a callback bound to a path pattern that runs after the
//! listeners of every commit touching a matching path. It receives the new
//! and previous value at the concrete path plus an [`ActionContext`], so it
//! can read, write (queued as a follow-up commit) or call actions.

use crate::actions::ActionContext;
use crate::error::Result;
use crate::path::Path;
use crate::tree;
use crate::value::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Watch callback: `(context, value, previous)`
pub type WatchCallback =
    Arc<dyn Fn(&ActionContext, &Value, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Ordered list of watcher registrations, validated when the store is built
#[derive(Clone, Default)]
pub struct WatchConfig {
    entries: Vec<(String, WatchCallback)>,
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `pattern`; may be a concrete path, a wildcard pattern or `*`
    pub fn on<F>(mut self, pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&ActionContext, &Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.push((pattern.into(), Arc::new(callback)));
        self
    }

    pub fn extend(mut self, other: WatchConfig) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct WatchEntry {
    raw: String,
    pattern: Path,
    callback: WatchCallback,
}

/// One watcher run resolved for a commit
pub struct WatchInvocation {
    pub pattern: String,
    pub path: Path,
    pub value: Value,
    pub previous: Value,
    pub callback: WatchCallback,
}

/// Installed watchers of a store, in registration order
#[derive(Default)]
pub struct WatchRuntime {
    entries: Vec<WatchEntry>,
}

impl WatchRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install every watcher of `config`; fails on the first bad pattern
    pub fn from_config(config: WatchConfig) -> Result<Self> {
        let mut runtime = Self::new();
        for (pattern, callback) in config.entries {
            runtime.add(&pattern, callback)?;
        }
        Ok(runtime)
    }

    pub fn add(&mut self, pattern: &str, callback: WatchCallback) -> Result<()> {
        let parsed = Path::parse_pattern(pattern)?;
        self.entries.push(WatchEntry {
            raw: pattern.to_string(),
            pattern: parsed,
            callback,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resolve the watcher runs for a commit.
    ///
    /// `affected` must already include ancestors of the changed paths. A `*`
    /// watcher runs once with the whole tree; any other watcher runs once per
    /// affected path it matches.
    pub fn collect(
        &self,
        affected: &BTreeSet<Path>,
        old_root: &Value,
        new_root: &Value,
    ) -> Vec<WatchInvocation> {
        let mut invocations = Vec::new();
        if affected.is_empty() {
            return invocations;
        }

        for entry in &self.entries {
            if entry.pattern.is_global() {
                invocations.push(WatchInvocation {
                    pattern: entry.raw.clone(),
                    path: Path::root(),
                    value: new_root.clone(),
                    previous: old_root.clone(),
                    callback: entry.callback.clone(),
                });
                continue;
            }

            let matching: Vec<&Path> = if entry.pattern.is_pattern() {
                affected
                    .iter()
                    .filter(|path| entry.pattern.matches(path))
                    .collect()
            } else {
                affected.get(&entry.pattern).into_iter().collect()
            };

            for path in matching {
                invocations.push(WatchInvocation {
                    pattern: entry.raw.clone(),
                    path: path.clone(),
                    value: tree::get(new_root, path),
                    previous: tree::get(old_root, path),
                    callback: entry.callback.clone(),
                });
            }
        }

        invocations
    }
}
