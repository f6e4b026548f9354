//! Change detection between two snapshots
//!
//! Only paths whose value actually changed are reported. Arrays are compared
//! index by index, so replacing a long array where a single element differs
//! reports that element (and the array itself), not every index.

use crate::config::EqualityMode;
use crate::path::{Path, Segment};
use crate::tree;
use crate::value::Value;
use std::collections::BTreeSet;

static UNDEFINED: Value = Value::Undefined;

/// Paths that changed between `old` and `new`, both rooted at `base`.
pub fn diff(old: &Value, new: &Value, base: &Path, mode: EqualityMode) -> BTreeSet<Path> {
    let mut out = BTreeSet::new();
    diff_into(old, new, base, mode, &mut out);
    out
}

/// Same as [`diff`] but accumulating into an existing set
pub fn diff_into(
    old: &Value,
    new: &Value,
    base: &Path,
    mode: EqualityMode,
    out: &mut BTreeSet<Path>,
) {
    if old.same_ref(new) {
        return;
    }
    if mode == EqualityMode::Structural && old == new {
        return;
    }
    diff_changed(old, new, base, out);
}

/// Changed paths of a whole commit.
///
/// Every write is diffed against the same pre-commit snapshot, never against
/// the result of an earlier write in the batch. Ancestors are not included;
/// see [`crate::registry::with_ancestors`].
pub fn changed_paths<'a, I>(
    old_root: &Value,
    new_root: &Value,
    write_paths: I,
    mode: EqualityMode,
) -> BTreeSet<Path>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut out = BTreeSet::new();
    for path in write_paths {
        // A `length` write reshapes the whole array.
        let base = match path.last() {
            Some(Segment::Length) => path.parent().unwrap_or_default(),
            _ => path.clone(),
        };
        let before = tree::get(old_root, &base);
        let after = tree::get(new_root, &base);
        diff_into(&before, &after, &base, mode, &mut out);

        // Writing below an array can grow it; the array's own `length` is
        // not under `base`.
        for depth in 0..base.len() {
            let ancestor = base.prefix(depth);
            let before = tree::get(old_root, &ancestor).array_len();
            let after = tree::get(new_root, &ancestor).array_len();
            if before != after {
                out.insert(ancestor.child(Segment::Length));
            }
        }
    }
    out
}

// `old` and `new` are known to differ (by identity at least).
fn diff_changed(old: &Value, new: &Value, base: &Path, out: &mut BTreeSet<Path>) {
    out.insert(base.clone());

    match (old, new) {
        (Value::Array(before), Value::Array(after)) => {
            if before.len() != after.len() {
                out.insert(base.child(Segment::Length));
            }
            for i in 0..before.len().max(after.len()) {
                let o = before.get(i).unwrap_or(&UNDEFINED);
                let n = after.get(i).unwrap_or(&UNDEFINED);
                if o != n {
                    diff_changed(o, n, &base.child(Segment::Index(i)), out);
                }
            }
        }
        (Value::Object(before), Value::Object(after)) => {
            for (key, o) in before.iter() {
                let n = after.get(key).unwrap_or(&UNDEFINED);
                if o != n {
                    diff_changed(o, n, &base.child(Segment::from_key(key)), out);
                }
            }
            for (key, n) in after.iter() {
                if !before.contains_key(key) && !n.is_undefined() {
                    diff_changed(&UNDEFINED, n, &base.child(Segment::from_key(key)), out);
                }
            }
        }
        _ => {
            // Kind changed, a container appeared or vanished, or a scalar
            // changed: everything below on either side is affected.
            if old.array_len() != new.array_len() {
                out.insert(base.child(Segment::Length));
            }
            sweep(old, base, out);
            sweep(new, base, out);
        }
    }
}

fn sweep(value: &Value, base: &Path, out: &mut BTreeSet<Path>) {
    match value {
        Value::Array(items) => {
            out.insert(base.child(Segment::Length));
            for (i, item) in items.iter().enumerate() {
                let path = base.child(Segment::Index(i));
                sweep(item, &path, out);
                out.insert(path);
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter() {
                let path = base.child(Segment::from_key(key));
                sweep(item, &path, out);
                out.insert(path);
            }
        }
        _ => {}
    }
}
