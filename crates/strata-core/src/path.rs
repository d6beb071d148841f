//! Dotted-path helpers over `serde_json::Value` trees.
//!
//! Paths look like `profile.meta.source` or `todos.0.title`. Numeric segments
//! index into arrays; every other segment is an object key.

use serde_json::{Map, Value};

/// Paths whose first segment starts with this marker belong to the platform
/// namespace (host-internal bookkeeping such as `$mel.guards`).
pub const PLATFORM_NAMESPACE_PREFIX: char = '$';

/// Split a dotted path into segments. The empty path has no segments.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Returns true if the path lives under the platform namespace.
pub fn is_platform_path(path: &str) -> bool {
    path.starts_with(PLATFORM_NAMESPACE_PREFIX)
}

/// Read the value at `segments`, or `None` if any hop is missing.
pub fn get_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Why a write could not be performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    /// Prefix of the path that holds a non-container value.
    pub at: String,
    /// JSON type found there.
    pub found: &'static str,
}

/// Write `value` at `segments`, creating intermediate objects as needed.
///
/// An intermediate that exists but is neither an object nor an indexable array
/// is a conflict; the root is left untouched in that case.
pub fn set_at(root: &mut Value, segments: &[&str], value: Value) -> Result<(), PathConflict> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let parent = container_at(root, parents)?;
    match parent {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items[index] = value;
                Ok(())
            }
            Ok(index) if index == items.len() => {
                items.push(value);
                Ok(())
            }
            _ => Err(PathConflict {
                at: parents.join("."),
                found: "array",
            }),
        },
        other => Err(PathConflict {
            at: parents.join("."),
            found: json_type_name(other),
        }),
    }
}

/// Remove the value at `segments`. Missing paths are a no-op.
pub fn remove_at(root: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Walk to `segments`, materialising missing hops (and a `null` target) as empty objects.
fn container_at<'a>(root: &'a mut Value, segments: &[&str]) -> Result<&'a mut Value, PathConflict> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| PathConflict {
                    at: segments[..depth].join("."),
                    found: "array",
                })?;
                items.get_mut(index).ok_or_else(|| PathConflict {
                    at: segments[..depth].join("."),
                    found: "array",
                })?
            }
            other => {
                return Err(PathConflict {
                    at: segments[..depth].join("."),
                    found: json_type_name(other),
                })
            }
        };
    }
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    Ok(current)
}

/// JSON type name used in diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_and_indexed() {
        let doc = json!({"todos": [{"title": "a"}, {"title": "b"}]});
        assert_eq!(get_at(&doc, &split_path("todos.1.title")), Some(&json!("b")));
        assert_eq!(get_at(&doc, &split_path("todos.7.title")), None);
        assert_eq!(get_at(&doc, &split_path("")), Some(&doc));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({});
        set_at(&mut doc, &split_path("profile.meta.source"), json!("import")).unwrap();
        assert_eq!(doc, json!({"profile": {"meta": {"source": "import"}}}));
    }

    #[test]
    fn test_set_through_scalar_conflicts() {
        let mut doc = json!({"count": 3});
        let err = set_at(&mut doc, &split_path("count.inner"), json!(1)).unwrap_err();
        assert_eq!(err.at, "count");
        assert_eq!(err.found, "number");
        assert_eq!(doc, json!({"count": 3}));
    }

    #[test]
    fn test_array_append_and_remove() {
        let mut doc = json!({"items": [1]});
        set_at(&mut doc, &split_path("items.1"), json!(2)).unwrap();
        assert_eq!(doc["items"], json!([1, 2]));
        assert_eq!(remove_at(&mut doc, &split_path("items.0")), Some(json!(1)));
        assert_eq!(doc["items"], json!([2]));
        assert_eq!(remove_at(&mut doc, &split_path("missing.key")), None);
    }

    #[test]
    fn test_platform_path() {
        assert!(is_platform_path("$mel.guards.intent"));
        assert!(!is_platform_path("mel"));
    }
}
