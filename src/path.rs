//! Dotted-path access and deep merge over [`serde_json::Value`] trees.
//!
//! Every other component reads and writes the runtime context through these
//! functions rather than walking `serde_json::Value` by hand, so the path
//! grammar (`a.b.0.c`, numeric segments address arrays) is defined once here.

use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by path/merge operations.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    /// `set` attempted to walk through a path segment that addresses into a
    /// non-container (e.g. `a.b` where `a` is a string).
    #[error("cannot set '{path}': segment '{segment}' addresses into a non-container")]
    #[diagnostic(code(flowspire::path::invalid_segment))]
    InvalidSegment { path: String, segment: String },

    /// `merge` found two values at the same path that cannot be reconciled
    /// because the caller asked for `merge` (not plain replacement) yet one
    /// side is an array and the other is not.
    #[error("merge conflict at '{path}': cannot merge {left_type} with {right_type}")]
    #[diagnostic(code(flowspire::path::merge_conflict))]
    MergeConflict {
        path: String,
        left_type: &'static str,
        right_type: &'static str,
    },
}

/// Reads the value at `path` in `root`. Unknown or invalid paths yield
/// `None` rather than an error (`get` never fails per §4.A).
#[must_use]
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Reads the value at `path`, falling back to `default` when absent.
#[must_use]
pub fn get_or<'a>(root: &'a Value, path: &str, default: &'a Value) -> &'a Value {
    get(root, path).unwrap_or(default)
}

/// Writes `value` at `path`, creating intermediate objects as needed.
/// Structural sharing: only the chain of ancestors on `path` is touched;
/// sibling subtrees are left untouched (we hold `&mut Value` so there is no
/// clone to avoid — the "shallow clone the chain" invariant is automatic).
///
/// # Errors
/// Returns [`PathError::InvalidSegment`] if an intermediate segment already
/// holds a non-object, non-array value that can't be walked through.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    if path.is_empty() {
        *root = value;
        return Ok(());
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        current = match current {
            Value::Object(obj) => obj
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(arr) => {
                let index: usize = segment.parse().map_err(|_| PathError::InvalidSegment {
                    path: path.to_string(),
                    segment: (*segment).to_string(),
                })?;
                while arr.len() <= index {
                    arr.push(Value::Null);
                }
                &mut arr[index]
            }
            Value::Null => {
                *current = Value::Object(Map::new());
                current
                    .as_object_mut()
                    .expect("just assigned")
                    .entry((*segment).to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            _ => {
                return Err(PathError::InvalidSegment {
                    path: path.to_string(),
                    segment: (*segment).to_string(),
                });
            }
        };
    }
    let last = segments[segments.len() - 1];
    match current {
        Value::Object(obj) => {
            obj.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(arr) => {
            let index: usize = last.parse().map_err(|_| PathError::InvalidSegment {
                path: path.to_string(),
                segment: last.to_string(),
            })?;
            while arr.len() <= index {
                arr.push(Value::Null);
            }
            arr[index] = value;
            Ok(())
        }
        Value::Null => {
            *current = Value::Object(Map::new());
            current
                .as_object_mut()
                .expect("just assigned")
                .insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(PathError::InvalidSegment {
            path: path.to_string(),
            segment: last.to_string(),
        }),
    }
}

/// Removes the value at `path`, if present. A missing path is a no-op.
pub fn unset(root: &mut Value, path: &str) {
    if path.is_empty() {
        return;
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        current = match current {
            Value::Object(obj) => match obj.get_mut(*segment) {
                Some(next) => next,
                None => return,
            },
            Value::Array(arr) => match segment.parse::<usize>().ok().and_then(|i| arr.get_mut(i))
            {
                Some(next) => next,
                None => return,
            },
            _ => return,
        };
    }
    let last = segments[segments.len() - 1];
    match current {
        Value::Object(obj) => {
            obj.remove(last);
        }
        Value::Array(arr) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < arr.len() {
                    arr.remove(index);
                }
            }
        }
        _ => {}
    }
}

/// Deep-merges `patch` onto `root`, returning the merged value.
///
/// Objects are merged key by key, recursively. Arrays are **replaced**, not
/// concatenated — the patch's array wins outright at that path. This is a
/// deliberate divergence from `MergeStrategy::DeepMerge`-style behavior seen
/// elsewhere in the ecosystem (which concatenates arrays); see DESIGN.md.
#[must_use]
pub fn merge(root: &Value, patch: &Value) -> Value {
    merge_at(root, patch, "")
}

fn merge_at(root: &Value, patch: &Value, path: &str) -> Value {
    match (root, patch) {
        (Value::Object(left), Value::Object(right)) => {
            let mut result = left.clone();
            for (key, right_value) in right {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let merged = match left.get(key) {
                    Some(left_value) => merge_at(left_value, right_value, &child_path),
                    None => right_value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }
        // Arrays are never concatenated: the patch replaces wholesale.
        (_, patch_value) => patch_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_reads_nested_object_and_array_paths() {
        let root = json!({"a": {"b": [10, 20, {"c": "x"}]}});
        assert_eq!(get(&root, "a.b.0"), Some(&json!(10)));
        assert_eq!(get(&root, "a.b.2.c"), Some(&json!("x")));
        assert_eq!(get(&root, "a.missing"), None);
    }

    #[test]
    fn get_or_falls_back_on_miss() {
        let root = json!({});
        let default = json!("fallback");
        assert_eq!(get_or(&root, "a.b", &default), &json!("fallback"));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, "user.profile.name", json!("Alice")).unwrap();
        assert_eq!(root, json!({"user": {"profile": {"name": "Alice"}}}));
    }

    #[test]
    fn set_leaves_sibling_subtrees_untouched() {
        let mut root = json!({"a": {"x": 1}, "b": {"y": 2}});
        set(&mut root, "a.x", json!(99)).unwrap();
        assert_eq!(root, json!({"a": {"x": 99}, "b": {"y": 2}}));
    }

    #[test]
    fn unset_removes_leaf_and_is_noop_on_missing() {
        let mut root = json!({"a": {"b": 1}});
        unset(&mut root, "a.b");
        assert_eq!(root, json!({"a": {}}));
        unset(&mut root, "a.nonexistent.deep");
        assert_eq!(root, json!({"a": {}}));
    }

    #[test]
    fn merge_replaces_arrays_instead_of_concatenating() {
        let root = json!({"tags": ["a", "b"], "n": 1});
        let patch = json!({"tags": ["c"]});
        let merged = merge(&root, &patch);
        assert_eq!(merged, json!({"tags": ["c"], "n": 1}));
    }

    #[test]
    fn merge_recurses_into_nested_objects() {
        let root = json!({"a": 1, "b": {"x": 10}});
        let patch = json!({"b": {"y": 20}, "c": 3});
        let merged = merge(&root, &patch);
        assert_eq!(merged, json!({"a": 1, "b": {"x": 10, "y": 20}, "c": 3}));
    }
}
