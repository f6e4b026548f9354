//! Subscription registry
//!
//! Maps path patterns to listeners and resolves which listeners a commit
//! affects:
//!
//! - **Exact**: a listener on `a.b` fires when `a.b` changed
//! - **Ancestor**: a listener on `a` fires when `a.b.c` changed, receiving `a`
//! - **Descendant**: a listener on `a.b.c` fires when `a` was replaced and the
//!   value at `a.b.c` differs (the change detector reports it)
//! - **Wildcard**: `todos.*.completed` fires once per concrete matching path
//! - **Global**: `*` fires once per commit with the whole tree

use crate::path::Path;
use crate::trie::PatternTrie;
use crate::tree;
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::sync::Arc;

new_key_type! {
    /// Unique identifier for a registered listener
    pub struct ListenerId;
}

/// What a listener receives
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    /// Concrete path of the notification (the root path for global listeners)
    pub path: Path,
    /// Value at `path` after the commit
    pub value: Value,
    /// Value at `path` before the commit
    pub previous: Value,
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&FieldChange) + Send + Sync>;

struct ListenerEntry {
    pattern: Path,
    callback: Listener,
}

/// A listener invocation resolved for one commit
pub struct Notification {
    pub listener: ListenerId,
    pub callback: Listener,
    pub change: FieldChange,
}

/// Registry of listeners keyed by path pattern
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: SlotMap<ListenerId, ListenerEntry>,
    /// Concrete patterns ("field entries")
    exact: FxHashMap<Path, SmallVec<[ListenerId; 4]>>,
    /// Patterns containing `*` segments
    wildcard: PatternTrie<ListenerId>,
    /// Listeners on the global `*` pattern
    global: SmallVec<[ListenerId; 4]>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `pattern`
    pub fn subscribe(&mut self, pattern: Path, callback: Listener) -> ListenerId {
        let id = self.listeners.insert(ListenerEntry {
            pattern: pattern.clone(),
            callback,
        });

        if pattern.is_global() {
            self.global.push(id);
        } else if pattern.is_pattern() {
            self.wildcard.insert(&pattern, id);
        } else {
            self.exact.entry(pattern).or_default().push(id);
        }
        id
    }

    /// Remove a listener.
    ///
    /// Unknown or already removed ids are a silent no-op returning `false`.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let Some(entry) = self.listeners.remove(id) else {
            return false;
        };

        if entry.pattern.is_global() {
            self.global.retain(|l| *l != id);
        } else if entry.pattern.is_pattern() {
            self.wildcard.remove(&entry.pattern, &id);
        } else if let Some(ids) = self.exact.get_mut(&entry.pattern) {
            ids.retain(|l| *l != id);
            if ids.is_empty() {
                self.exact.remove(&entry.pattern);
            }
        }
        true
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(id)
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of concrete paths with at least one listener
    pub fn field_count(&self) -> usize {
        self.exact.len()
    }

    /// Drop every listener
    pub fn clear(&mut self) {
        self.listeners.clear();
        self.exact.clear();
        self.wildcard.clear();
        self.global.clear();
    }

    /// Resolve the listeners affected by `changed`.
    ///
    /// Each `(listener, concrete path)` pair is produced at most once, so
    /// exact and ancestor listeners fire once per commit and wildcard
    /// listeners once per matching path.
    pub fn collect(
        &self,
        changed: &BTreeSet<Path>,
        old_root: &Value,
        new_root: &Value,
    ) -> Vec<Notification> {
        let mut notifications = Vec::new();
        if changed.is_empty() {
            return notifications;
        }

        let affected = with_ancestors(changed);
        let mut seen: FxHashSet<(ListenerId, &Path)> = FxHashSet::default();

        for path in &affected {
            let exact = self.exact.get(path).into_iter().flatten().copied();
            let matched = exact.chain(self.wildcard.match_path(path));
            for id in matched {
                if seen.insert((id, path)) {
                    if let Some(entry) = self.listeners.get(id) {
                        notifications.push(Notification {
                            listener: id,
                            callback: entry.callback.clone(),
                            change: FieldChange {
                                path: path.clone(),
                                value: tree::get(new_root, path),
                                previous: tree::get(old_root, path),
                            },
                        });
                    }
                }
            }
        }

        for &id in &self.global {
            if let Some(entry) = self.listeners.get(id) {
                notifications.push(Notification {
                    listener: id,
                    callback: entry.callback.clone(),
                    change: FieldChange {
                        path: Path::root(),
                        value: new_root.clone(),
                        previous: old_root.clone(),
                    },
                });
            }
        }

        notifications
    }
}

/// `changed` plus every strict ancestor of each changed path
pub fn with_ancestors(changed: &BTreeSet<Path>) -> BTreeSet<Path> {
    let mut affected = changed.clone();
    for path in changed {
        affected.extend(path.ancestors());
    }
    affected
}
