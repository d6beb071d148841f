//! Computed-field resolver.
//!
//! Re-derives every computed field from current data. Fields are evaluated in
//! dependency order; a dependency cycle is reported as a value-level
//! `CYCLIC_DEPENDENCY` error and never panics.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use strata_core::{DomainSchema, ErrorCode, ErrorValue, EvalContext, Snapshot};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Evaluation order for computed fields, or the cycle that prevents one.
pub fn evaluation_order(schema: &DomainSchema) -> Result<Vec<String>, Vec<String>> {
    let graph: BTreeMap<&String, Vec<String>> = schema
        .computed
        .fields
        .iter()
        .map(|(name, spec)| (name, spec.dependencies()))
        .collect();

    let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
    let mut order = Vec::with_capacity(graph.len());
    let mut stack: Vec<String> = Vec::new();

    for name in graph.keys() {
        visit(name, &graph, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit(
    name: &str,
    graph: &BTreeMap<&String, Vec<String>>,
    marks: &mut BTreeMap<String, Mark>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<(), Vec<String>> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| n == name).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(name.to_string());
            return Err(cycle);
        }
        None => {}
    }

    marks.insert(name.to_string(), Mark::Visiting);
    stack.push(name.to_string());
    let key = name.to_string();
    if let Some(deps) = graph.get(&key) {
        for dep in deps {
            // Undeclared dependencies are a schema problem, reported by validation.
            if graph.contains_key(dep) {
                visit(dep, graph, marks, stack, order)?;
            }
        }
    }
    stack.pop();
    marks.insert(name.to_string(), Mark::Done);
    order.push(name.to_string());
    Ok(())
}

/// Derive all computed fields for a snapshot.
pub fn derive_computed(
    schema: &DomainSchema,
    snapshot: &Snapshot,
    now: i64,
) -> Result<Map<String, Value>, ErrorValue> {
    let order = evaluation_order(schema).map_err(|cycle| {
        ErrorValue::new(
            ErrorCode::CyclicDependency,
            format!("computed fields form a cycle: {}", cycle.join(" -> ")),
            now,
        )
        .with_context(serde_json::json!({ "cycle": cycle }))
    })?;

    let mut computed = Map::new();
    for name in order {
        let spec = &schema.computed.fields[&name];
        let value = {
            let ctx = EvalContext::new(snapshot).with_computed(&computed);
            spec.expr.evaluate(&ctx).map_err(|err| {
                ErrorValue::new(
                    err.code,
                    format!("computed field '{}': {}", name, err.message),
                    now,
                )
                .with_context(serde_json::json!({ "field": name }))
            })?
        };
        computed.insert(name, value);
    }

    debug!(fields = computed.len(), "computed fields derived");
    Ok(computed)
}

/// Re-derive computed fields in place. On failure the computed map is reset to
/// empty, never left stale, and the error is returned for recording.
pub fn refresh_computed(schema: &DomainSchema, snapshot: &mut Snapshot, now: i64) -> Option<ErrorValue> {
    match derive_computed(schema, snapshot, now) {
        Ok(computed) => {
            snapshot.computed = computed;
            None
        }
        Err(err) => {
            snapshot.computed = Map::new();
            Some(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(computed: Value) -> DomainSchema {
        DomainSchema::from_json(json!({
            "id": "t",
            "version": "1",
            "state": {"fields": {"items": {"type": "array", "default": [1, 2, 3]}}},
            "computed": {"fields": computed}
        }))
        .unwrap()
    }

    #[test]
    fn test_dependency_order() {
        let schema = schema(json!({
            "double": {"expr": {"kind": "mul", "left": {"kind": "get", "path": "computed.count"}, "right": {"kind": "lit", "value": 2}}},
            "count": {"expr": {"kind": "len", "arg": {"kind": "get", "path": "items"}}}
        }));
        let snap = schema.genesis_snapshot();

        let computed = derive_computed(&schema, &snap, 0).unwrap();
        assert_eq!(computed["count"], json!(3));
        assert_eq!(computed["double"], json!(6));
    }

    #[test]
    fn test_cycle_detected() {
        let schema = schema(json!({
            "a": {"expr": {"kind": "get", "path": "computed.b"}},
            "b": {"expr": {"kind": "get", "path": "computed.a"}}
        }));
        let mut snap = schema.genesis_snapshot();
        snap.computed.insert("stale".to_string(), json!(true));

        let err = refresh_computed(&schema, &mut snap, 7).unwrap();
        assert_eq!(err.code, ErrorCode::CyclicDependency);
        assert_eq!(err.timestamp, 7);
        assert!(snap.computed.is_empty());
    }

    #[test]
    fn test_self_cycle_detected() {
        let schema = schema(json!({
            "a": {"expr": {"kind": "get", "path": "computed.a"}}
        }));
        assert_eq!(evaluation_order(&schema).unwrap_err(), vec!["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_evaluation_error_resets() {
        let schema = schema(json!({
            "bad": {"expr": {"kind": "not", "arg": {"kind": "get", "path": "items"}}}
        }));
        let mut snap = schema.genesis_snapshot();
        let err = refresh_computed(&schema, &mut snap, 0).unwrap();
        assert_eq!(err.code, ErrorCode::TypeMismatch);
        assert!(snap.computed.is_empty());
    }
}
