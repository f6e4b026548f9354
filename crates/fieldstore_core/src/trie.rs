//! Segment trie for wildcard subscription patterns
//!
//! Patterns such as `todos.*.completed` are stored segment by segment; `*`
//! matches exactly one segment. Matching a concrete path walks the exact
//! child and the wildcard child at every level, so the cost depends on the
//! path depth rather than on the number of registered patterns.

use crate::path::{Path, Segment};
use rustc_hash::FxHashMap;

/// Trie keyed by path segments
pub struct PatternTrie<T> {
    root: TrieNode<T>,
}

struct TrieNode<T> {
    /// Exact-match children
    children: FxHashMap<Segment, TrieNode<T>>,
    /// `*` child - matches any single segment
    wildcard: Option<Box<TrieNode<T>>>,
    /// Values whose pattern terminates here
    values: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            children: FxHashMap::default(),
            wildcard: None,
            values: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> PatternTrie<T> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }

    /// Insert a value under `pattern`
    pub fn insert(&mut self, pattern: &Path, value: T) {
        self.root.insert(pattern.segments(), value);
    }

    /// All values whose pattern matches `concrete` segment for segment
    pub fn match_path(&self, concrete: &Path) -> Vec<T> {
        let mut results = Vec::new();
        self.root.collect_matches(concrete.segments(), &mut results);
        results
    }

    /// Remove `value` from `pattern`, pruning emptied branches.
    ///
    /// Returns `true` if it was present.
    pub fn remove(&mut self, pattern: &Path, value: &T) -> bool {
        self.root.remove(pattern.segments(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
    }
}

impl<T: Clone + PartialEq> Default for PatternTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> TrieNode<T> {
    fn insert(&mut self, segments: &[Segment], value: T) {
        let Some((first, rest)) = segments.split_first() else {
            self.values.push(value);
            return;
        };

        match first {
            Segment::Wildcard => self
                .wildcard
                .get_or_insert_with(Box::default)
                .insert(rest, value),
            segment => self
                .children
                .entry(segment.clone())
                .or_default()
                .insert(rest, value),
        }
    }

    fn collect_matches(&self, segments: &[Segment], results: &mut Vec<T>) {
        let Some((first, rest)) = segments.split_first() else {
            results.extend(self.values.iter().cloned());
            return;
        };

        if let Some(child) = self.children.get(first) {
            child.collect_matches(rest, results);
        }
        if let Some(ref wildcard) = self.wildcard {
            if *first != Segment::Length {
                wildcard.collect_matches(rest, results);
            }
        }
    }

    fn remove(&mut self, segments: &[Segment], value: &T) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            let before = self.values.len();
            self.values.retain(|v| v != value);
            return self.values.len() < before;
        };

        match first {
            Segment::Wildcard => {
                let Some(child) = self.wildcard.as_mut() else {
                    return false;
                };
                let removed = child.remove(rest, value);
                if child.is_empty() {
                    self.wildcard = None;
                }
                removed
            }
            segment => {
                let Some(child) = self.children.get_mut(segment) else {
                    return false;
                };
                let removed = child.remove(rest, value);
                if child.is_empty() {
                    self.children.remove(segment);
                }
                removed
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty() && self.wildcard.is_none()
    }
}
