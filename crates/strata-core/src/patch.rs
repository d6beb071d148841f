//! Patch operations: the only way snapshot data changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::is_platform_path;

/// One atomic mutation instruction against snapshot data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    /// Replace the value at `path`.
    Set { path: String, value: Value },
    /// Shallow-merge `value` into the object at `path`, creating it if missing.
    Merge { path: String, value: Map<String, Value> },
    /// Remove the value at `path`.
    Unset { path: String },
}

impl Patch {
    /// Create a set patch.
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Patch::Set {
            path: path.into(),
            value,
        }
    }

    /// Create a merge patch. Non-object values merge as an empty object.
    pub fn merge(path: impl Into<String>, value: Value) -> Self {
        let value = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Patch::Merge {
            path: path.into(),
            value,
        }
    }

    /// Create an unset patch.
    pub fn unset(path: impl Into<String>) -> Self {
        Patch::Unset { path: path.into() }
    }

    /// The path this patch targets.
    pub fn path(&self) -> &str {
        match self {
            Patch::Set { path, .. } | Patch::Merge { path, .. } | Patch::Unset { path } => path,
        }
    }

    /// Operation name (`set`, `merge`, `unset`).
    pub fn op(&self) -> &'static str {
        match self {
            Patch::Set { .. } => "set",
            Patch::Merge { .. } => "merge",
            Patch::Unset { .. } => "unset",
        }
    }

    /// Returns true if the patch targets the platform namespace.
    pub fn is_platform(&self) -> bool {
        is_platform_path(self.path())
    }
}
