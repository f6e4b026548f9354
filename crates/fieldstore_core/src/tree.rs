//! Pure get/set over the value tree
//!
//! Writes never mutate the input: every container on the written path is
//! shallow-copied and everything else is shared with the previous root.

use crate::error::{Result, StoreError};
use crate::path::{Path, Segment};
use crate::value::{Map, Value};

/// Largest array a single write may create or grow to.
///
/// Index and `length` writes beyond it are rejected with
/// [`StoreError::InvalidValue`] instead of padding.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Read the value at `path`.
///
/// Missing intermediates yield [`Value::Undefined`]. A trailing `length`
/// yields the array length, or `0` when the receiver is absent or not an
/// array (objects with an explicit `length` entry return that entry).
pub fn get(root: &Value, path: &Path) -> Value {
    let segments = path.segments();
    let trailing_length = matches!(segments.last(), Some(Segment::Length));
    let mut current = root;

    for (i, segment) in segments.iter().enumerate() {
        let next = match (current, segment) {
            (Value::Array(items), Segment::Length) => {
                return if i + 1 == segments.len() {
                    Value::from(items.len())
                } else {
                    Value::Undefined
                };
            }
            (Value::Array(items), Segment::Index(idx)) => items.get(*idx),
            (Value::Object(map), segment) => map.get(segment.as_key().as_ref()),
            _ => None,
        };

        match next {
            Some(value) => current = value,
            None if trailing_length => return Value::from(0usize),
            None => return Value::Undefined,
        }
    }

    current.clone()
}

/// Return a new root with the node at `path` replaced by `value`.
///
/// Missing containers are created: an array when the next segment is an
/// index, an object otherwise. Writing past the end of an array pads it with
/// `Undefined`; writing `length` on an array truncates or pads it.
pub fn set(root: &Value, path: &Path, value: Value) -> Result<Value> {
    set_in(root, path.segments(), value, path)
}

/// Apply every write, in order, to one working copy
pub fn set_many<'a, I>(root: &Value, writes: I) -> Result<Value>
where
    I: IntoIterator<Item = (&'a Path, &'a Value)>,
{
    let mut working = root.clone();
    for (path, value) in writes {
        working = set(&working, path, value.clone())?;
    }
    Ok(working)
}

/// Return a new root without the node at `path`.
///
/// Array elements are spliced out. A missing path returns `root` unchanged.
pub fn remove(root: &Value, path: &Path) -> Value {
    remove_in(root, path.segments()).unwrap_or_else(|| root.clone())
}

fn set_in(node: &Value, segments: &[Segment], value: Value, full: &Path) -> Result<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value);
    };

    match (node, head) {
        (_, Segment::Wildcard) => Err(StoreError::invalid_path(
            &full.to_string(),
            "wildcards are not allowed in write paths",
        )),

        (Value::Array(items), Segment::Length) if rest.is_empty() => {
            let len = value.as_u64().ok_or_else(|| {
                StoreError::InvalidValue(format!(
                    "'{}' must be a non-negative integer, got {}",
                    full,
                    value.type_name()
                ))
            })?;
            let len = checked_len(len, full)?;
            let mut items = Vec::clone(items);
            items.resize(len, Value::Undefined);
            Ok(Value::array(items))
        }

        (Value::Array(items), Segment::Index(idx)) => {
            let mut items = Vec::clone(items);
            if *idx >= items.len() {
                items.resize(len_for_index(*idx, full)?, Value::Undefined);
            }
            let child = std::mem::take(&mut items[*idx]);
            items[*idx] = set_in(&child, rest, value, full)?;
            Ok(Value::array(items))
        }

        (Value::Array(_), segment) => Err(StoreError::InvalidValue(format!(
            "cannot write key '{}' of array in '{}'",
            segment, full
        ))),

        (Value::Object(map), segment) => {
            let mut map = Map::clone(map);
            let key = segment.as_key().into_owned();
            let child = map.get(&key).cloned().unwrap_or_default();
            let updated = set_in(&child, rest, value, full)?;
            map.insert(key, updated);
            Ok(Value::object(map))
        }

        // Absent or scalar: grow a fresh container shaped by the segment.
        (_, Segment::Index(idx)) => {
            let mut items = vec![Value::Undefined; len_for_index(*idx, full)?];
            items[*idx] = set_in(&Value::Undefined, rest, value, full)?;
            Ok(Value::array(items))
        }
        (_, segment) => {
            let mut map = Map::new();
            map.insert(
                segment.as_key().into_owned(),
                set_in(&Value::Undefined, rest, value, full)?,
            );
            Ok(Value::object(map))
        }
    }
}

fn checked_len(len: u64, full: &Path) -> Result<usize> {
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_ARRAY_LEN)
        .ok_or_else(|| {
            StoreError::InvalidValue(format!(
                "'{}' would grow an array to {} elements (limit {})",
                full, len, MAX_ARRAY_LEN
            ))
        })
}

fn len_for_index(idx: usize, full: &Path) -> Result<usize> {
    match idx.checked_add(1) {
        Some(len) if len <= MAX_ARRAY_LEN => Ok(len),
        _ => Err(StoreError::InvalidValue(format!(
            "index {} in '{}' is beyond the array limit of {}",
            idx, full, MAX_ARRAY_LEN
        ))),
    }
}

fn remove_in(node: &Value, segments: &[Segment]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;

    match (node, head) {
        (Value::Array(items), Segment::Index(idx)) if *idx < items.len() => {
            let mut items = Vec::clone(items);
            if rest.is_empty() {
                items.remove(*idx);
            } else {
                let updated = remove_in(&items[*idx], rest)?;
                items[*idx] = updated;
            }
            Some(Value::array(items))
        }
        (Value::Object(map), segment) => {
            let key = segment.as_key();
            let child = map.get(key.as_ref())?;
            let mut map = Map::clone(map);
            if rest.is_empty() {
                map.shift_remove(key.as_ref());
            } else {
                let updated = remove_in(child, rest)?;
                map.insert(key.into_owned(), updated);
            }
            Some(Value::object(map))
        }
        _ => None,
    }
}
