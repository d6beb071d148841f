//! Versioned domain schema, as produced by the domain compiler.
//!
//! The schema declares the data field tree, computed fields, and actions
//! (flow, availability guard, input shape). Strata only consumes schemas; it
//! never compiles them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StrataError};
use crate::expr::Expr;
use crate::flow::FlowNode;
use crate::hash::canonical_hash;
use crate::path::json_type_name;
use crate::snapshot::Snapshot;

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Null,
    Object,
    Array,
    #[default]
    Any,
}

impl FieldType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Null => "null",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }
}

/// Specification of a data field (or of an action's input).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    /// A required field rejects `null`.
    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Shape of an object field. An object without `fields` is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldSpec>>,

    /// Element shape of an array field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSpec>>,

    /// Allowed values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl FieldSpec {
    /// A field of the given type with no further constraints.
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    /// Returns true if values of this field are objects.
    pub fn is_object(&self) -> bool {
        self.field_type == FieldType::Object
    }

    /// Initial value for genesis snapshots: the default, or an object of child defaults.
    pub fn initial_value(&self) -> Option<Value> {
        if let Some(default) = &self.default {
            return Some(default.clone());
        }
        let fields = self.fields.as_ref().filter(|_| self.is_object())?;
        let mut out = Map::new();
        for (name, spec) in fields {
            if let Some(value) = spec.initial_value() {
                out.insert(name.clone(), value);
            }
        }
        Some(Value::Object(out))
    }

    /// Check a runtime value against this spec. The error names the offending location.
    pub fn check(&self, value: &Value, at: &str) -> std::result::Result<(), String> {
        if value.is_null() {
            return if self.required && self.field_type != FieldType::Null {
                Err(format!("{} is required, got null", display_at(at)))
            } else {
                Ok(())
            };
        }

        let type_ok = match self.field_type {
            FieldType::Any => true,
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Null => false,
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        };
        if !type_ok {
            return Err(format!(
                "{} expects {}, got {}",
                display_at(at),
                self.field_type.as_str(),
                json_type_name(value)
            ));
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(format!("{} is not one of the allowed values", display_at(at)));
            }
        }

        if let (Some(fields), Value::Object(map)) = (&self.fields, value) {
            for (key, child) in map {
                let spec = fields
                    .get(key)
                    .ok_or_else(|| format!("{} has undeclared field '{}'", display_at(at), key))?;
                spec.check(child, &join(at, key))?;
            }
            for (name, spec) in fields {
                if spec.required && !map.contains_key(name) {
                    return Err(format!("{} is missing required field '{}'", display_at(at), name));
                }
            }
        }

        if let (Some(items), Value::Array(values)) = (&self.items, value) {
            for (index, item) in values.iter().enumerate() {
                items.check(item, &join(at, &index.to_string()))?;
            }
        }

        Ok(())
    }
}

fn display_at(at: &str) -> &str {
    if at.is_empty() {
        "value"
    } else {
        at
    }
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}

/// Declared data fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

/// A derived field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFieldSpec {
    pub expr: Expr,

    /// Extra explicit dependencies on other computed fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
}

impl ComputedFieldSpec {
    /// Names of computed fields this field depends on.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: BTreeSet<String> = self.expr.computed_dependencies().into_iter().collect();
        for dep in &self.deps {
            deps.insert(dep.strip_prefix("computed.").unwrap_or(dep).to_string());
        }
        deps.into_iter().collect()
    }
}

/// Declared computed fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedSpec {
    #[serde(default)]
    pub fields: BTreeMap<String, ComputedFieldSpec>,
}

/// One domain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub flow: FlowNode,

    /// Declared input shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<FieldSpec>,

    /// Availability guard; must evaluate to a boolean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Expr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where a data path lands in the field tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldResolution<'a> {
    /// The path names a declared field.
    Declared(&'a FieldSpec),
    /// The path runs under an open object or `any` field; no type to check.
    Open,
    /// The path is not declared.
    NotFound,
}

/// A versioned domain schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSchema {
    pub id: String,

    pub version: String,

    /// Content hash. When present it must match [`DomainSchema::content_hash`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(default)]
    pub state: StateSpec,

    #[serde(default)]
    pub computed: ComputedSpec,

    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
}

impl DomainSchema {
    /// Parse a schema from JSON.
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// SHA-256 over the canonical JSON of the schema, excluding `hash` itself.
    pub fn content_hash(&self) -> String {
        let mut body = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut body {
            map.remove("hash");
        }
        canonical_hash(&body)
    }

    /// The declared hash if present, otherwise the computed one.
    pub fn schema_hash(&self) -> String {
        self.hash.clone().unwrap_or_else(|| self.content_hash())
    }

    /// Fill in `hash` from the content.
    pub fn with_computed_hash(mut self) -> Self {
        self.hash = Some(self.content_hash());
        self
    }

    /// Look up an action.
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Structural problems that make the schema unusable. Empty means well-formed.
    pub fn problems(&self, max_flow_depth: usize) -> Vec<String> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("schema id is empty".to_string());
        }

        if let Some(declared) = &self.hash {
            let actual = self.content_hash();
            if declared != &actual {
                problems.push(format!(
                    "schema hash mismatch: declared {}, computed {}",
                    declared, actual
                ));
            }
        }

        for (name, spec) in &self.computed.fields {
            for dep in spec.dependencies() {
                if !self.computed.fields.contains_key(&dep) {
                    problems.push(format!(
                        "computed field '{}' depends on undeclared computed field '{}'",
                        name, dep
                    ));
                }
            }
        }

        for (name, action) in &self.actions {
            let depth = action.flow.depth();
            if depth > max_flow_depth {
                problems.push(format!(
                    "action '{}' flow depth {} exceeds limit {}",
                    name, depth, max_flow_depth
                ));
            }
            if let Some(input) = &action.input {
                if input.field_type != FieldType::Object && input.field_type != FieldType::Any {
                    problems.push(format!("action '{}' input must be an object", name));
                }
            }
        }

        problems
    }

    /// Validate well-formedness, returning an error listing every problem.
    pub fn validate(&self, max_flow_depth: usize) -> Result<()> {
        let problems = self.problems(max_flow_depth);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StrataError::InvalidSchema(problems.join("; ")))
        }
    }

    /// Resolve a data path (already split) against the declared field tree.
    pub fn resolve_field(&self, segments: &[&str]) -> FieldResolution<'_> {
        let Some((first, rest)) = segments.split_first() else {
            return FieldResolution::NotFound;
        };
        let Some(mut spec) = self.state.fields.get(*first) else {
            return FieldResolution::NotFound;
        };

        for segment in rest {
            spec = match spec.field_type {
                FieldType::Any => return FieldResolution::Open,
                FieldType::Object => match &spec.fields {
                    None => return FieldResolution::Open,
                    Some(fields) => match fields.get(*segment) {
                        Some(child) => child,
                        None => return FieldResolution::NotFound,
                    },
                },
                FieldType::Array if segment.parse::<usize>().is_ok() => match &spec.items {
                    None => return FieldResolution::Open,
                    Some(items) => items,
                },
                _ => return FieldResolution::NotFound,
            };
        }
        FieldResolution::Declared(spec)
    }

    /// Genesis data built from field defaults.
    pub fn initial_data(&self) -> Value {
        let mut data = Map::new();
        for (name, spec) in &self.state.fields {
            if let Some(value) = spec.initial_value() {
                data.insert(name.clone(), value);
            }
        }
        Value::Object(data)
    }

    /// A version-0 snapshot carrying this schema's defaults and hash.
    /// Computed fields are not derived here; that is the compute crate's job.
    pub fn genesis_snapshot(&self) -> Snapshot {
        Snapshot::new(self.initial_data(), self.schema_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_schema() -> DomainSchema {
        DomainSchema::from_json(json!({
            "id": "todo",
            "version": "1.0.0",
            "state": {"fields": {
                "todos": {"type": "array", "default": [], "items": {"type": "object", "fields": {
                    "title": {"type": "string", "required": true},
                    "done": {"type": "boolean"}
                }}},
                "filter": {"type": "string", "default": "all", "enum": ["all", "done"]},
                "profile": {"type": "object", "fields": {
                    "name": {"type": "string"},
                    "meta": {"type": "object"}
                }}
            }},
            "computed": {"fields": {
                "count": {"expr": {"kind": "len", "arg": {"kind": "get", "path": "todos"}}}
            }},
            "actions": {
                "clear": {"flow": {"kind": "patch", "op": "set", "path": "todos", "value": {"kind": "lit", "value": []}}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_initial_data() {
        let schema = todo_schema();
        assert_eq!(
            schema.initial_data(),
            json!({"todos": [], "filter": "all", "profile": {}})
        );
    }

    #[test]
    fn test_resolve_field() {
        let schema = todo_schema();
        assert!(matches!(
            schema.resolve_field(&["todos", "0", "title"]),
            FieldResolution::Declared(spec) if spec.field_type == FieldType::String
        ));
        assert_eq!(schema.resolve_field(&["profile", "meta", "source"]), FieldResolution::Open);
        assert_eq!(schema.resolve_field(&["profile", "age"]), FieldResolution::NotFound);
        assert_eq!(schema.resolve_field(&["filter", "x"]), FieldResolution::NotFound);
        assert_eq!(schema.resolve_field(&["unknown"]), FieldResolution::NotFound);
    }

    #[test]
    fn test_field_check() {
        let schema = todo_schema();
        let spec = &schema.state.fields["todos"];
        assert!(spec.check(&json!([{"title": "a", "done": false}]), "todos").is_ok());

        let err = spec.check(&json!([{"done": false}]), "todos").unwrap_err();
        assert!(err.contains("title"));

        let filter = &schema.state.fields["filter"];
        assert!(filter.check(&json!("nope"), "filter").is_err());
        assert!(filter.check(&json!(3), "filter").unwrap_err().contains("expects string"));
    }

    #[test]
    fn test_hash_and_validation() {
        let schema = todo_schema().with_computed_hash();
        assert!(schema.validate(64).is_ok());
        assert_eq!(schema.schema_hash(), schema.content_hash());

        let mut tampered = schema.clone();
        tampered.hash = Some("deadbeef".to_string());
        assert!(tampered.validate(64).is_err());
    }

    #[test]
    fn test_undeclared_computed_dependency() {
        let mut schema = todo_schema();
        schema.computed.fields.insert(
            "broken".to_string(),
            ComputedFieldSpec {
                expr: Expr::get("computed.ghost"),
                deps: Vec::new(),
            },
        );
        let problems = schema.problems(64);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("ghost"));
    }
}
