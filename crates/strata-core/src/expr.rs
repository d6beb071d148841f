//! Expression language used by guards, computed fields, patch values and effect params.
//!
//! Expressions are JSON documents tagged by `kind`. Evaluation is pure: it reads
//! a borrowed [`EvalContext`] and never mutates anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorCode;
use crate::path::{get_at, json_type_name, split_path};
use crate::snapshot::{Snapshot, SnapshotMeta, SystemState};

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expr {
    Lit { value: Value },
    Get { path: String },
    Eq { left: Box<Expr>, right: Box<Expr> },
    Neq { left: Box<Expr>, right: Box<Expr> },
    Gt { left: Box<Expr>, right: Box<Expr> },
    Gte { left: Box<Expr>, right: Box<Expr> },
    Lt { left: Box<Expr>, right: Box<Expr> },
    Lte { left: Box<Expr>, right: Box<Expr> },
    And { args: Vec<Expr> },
    Or { args: Vec<Expr> },
    Not { arg: Box<Expr> },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(rename = "else")]
        otherwise: Box<Expr>,
    },
    Add { left: Box<Expr>, right: Box<Expr> },
    Sub { left: Box<Expr>, right: Box<Expr> },
    Mul { left: Box<Expr>, right: Box<Expr> },
    Div { left: Box<Expr>, right: Box<Expr> },
    Mod { left: Box<Expr>, right: Box<Expr> },
    Concat { args: Vec<Expr> },
    Len { arg: Box<Expr> },
    IsNull { arg: Box<Expr> },
    Coalesce { args: Vec<Expr> },
    Object { fields: BTreeMap<String, Expr> },
    Append { array: Box<Expr>, value: Box<Expr> },
}

/// Failure while evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ExprError {
    pub code: ErrorCode,
    pub message: String,
}

impl ExprError {
    fn type_mismatch(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::TypeMismatch,
            message: message.into(),
        }
    }
}

/// Read-only view an expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub data: &'a Value,
    pub computed: &'a Map<String, Value>,
    pub input: &'a Value,
    pub meta: &'a SnapshotMeta,
    pub system: &'a SystemState,
}

impl<'a> EvalContext<'a> {
    /// View over a whole snapshot.
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            data: &snapshot.data,
            computed: &snapshot.computed,
            input: &snapshot.input,
            meta: &snapshot.meta,
            system: &snapshot.system,
        }
    }

    /// Same view with a different computed map (used while re-deriving).
    pub fn with_computed(mut self, computed: &'a Map<String, Value>) -> Self {
        self.computed = computed;
        self
    }

    /// Resolve a dotted path. Missing paths read as `null`.
    pub fn resolve(&self, path: &str) -> Value {
        let segments = split_path(path);
        let Some((root, rest)) = segments.split_first() else {
            return self.data.clone();
        };

        let found = match *root {
            "data" => get_at(self.data, rest).cloned(),
            "input" => get_at(self.input, rest).cloned(),
            "computed" => rest.split_first().and_then(|(name, tail)| {
                self.computed.get(*name).and_then(|v| get_at(v, tail)).cloned()
            }),
            "meta" => serde_json::to_value(self.meta)
                .ok()
                .and_then(|v| get_at(&v, rest).cloned()),
            "system" => serde_json::to_value(self.system)
                .ok()
                .and_then(|v| get_at(&v, rest).cloned()),
            _ => get_at(self.data, &segments).cloned(),
        };
        found.unwrap_or(Value::Null)
    }
}

impl Expr {
    /// Literal expression.
    pub fn lit(value: Value) -> Self {
        Expr::Lit { value }
    }

    /// Path read expression.
    pub fn get(path: impl Into<String>) -> Self {
        Expr::Get { path: path.into() }
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Lit { value } => Ok(value.clone()),
            Expr::Get { path } => Ok(ctx.resolve(path)),
            Expr::Eq { left, right } => {
                Ok(Value::Bool(loose_eq(&left.evaluate(ctx)?, &right.evaluate(ctx)?)))
            }
            Expr::Neq { left, right } => {
                Ok(Value::Bool(!loose_eq(&left.evaluate(ctx)?, &right.evaluate(ctx)?)))
            }
            Expr::Gt { left, right } => compare(left, right, ctx, |o| o.is_gt()),
            Expr::Gte { left, right } => compare(left, right, ctx, |o| o.is_ge()),
            Expr::Lt { left, right } => compare(left, right, ctx, |o| o.is_lt()),
            Expr::Lte { left, right } => compare(left, right, ctx, |o| o.is_le()),
            Expr::And { args } => {
                for arg in args {
                    if !expect_bool(&arg.evaluate(ctx)?, "and")? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or { args } => {
                for arg in args {
                    if expect_bool(&arg.evaluate(ctx)?, "or")? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not { arg } => Ok(Value::Bool(!expect_bool(&arg.evaluate(ctx)?, "not")?)),
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if expect_bool(&cond.evaluate(ctx)?, "if")? {
                    then.evaluate(ctx)
                } else {
                    otherwise.evaluate(ctx)
                }
            }
            Expr::Add { left, right } => arithmetic(left, right, ctx, "add", |a, b| Ok(a + b)),
            Expr::Sub { left, right } => arithmetic(left, right, ctx, "sub", |a, b| Ok(a - b)),
            Expr::Mul { left, right } => arithmetic(left, right, ctx, "mul", |a, b| Ok(a * b)),
            Expr::Div { left, right } => arithmetic(left, right, ctx, "div", |a, b| {
                if b == 0.0 {
                    Err(division_by_zero())
                } else {
                    Ok(a / b)
                }
            }),
            Expr::Mod { left, right } => arithmetic(left, right, ctx, "mod", |a, b| {
                if b == 0.0 {
                    Err(division_by_zero())
                } else {
                    Ok(a % b)
                }
            }),
            Expr::Concat { args } => concat(args, ctx),
            Expr::Len { arg } => match arg.evaluate(ctx)? {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(ExprError::type_mismatch(format!(
                    "len expects string, array or object, got {}",
                    json_type_name(&other)
                ))),
            },
            Expr::IsNull { arg } => Ok(Value::Bool(arg.evaluate(ctx)?.is_null())),
            Expr::Coalesce { args } => {
                for arg in args {
                    let value = arg.evaluate(ctx)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Expr::Object { fields } => {
                let mut out = Map::new();
                for (key, expr) in fields {
                    out.insert(key.clone(), expr.evaluate(ctx)?);
                }
                Ok(Value::Object(out))
            }
            Expr::Append { array, value } => {
                let mut items = match array.evaluate(ctx)? {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(ExprError::type_mismatch(format!(
                            "append expects an array, got {}",
                            json_type_name(&other)
                        )))
                    }
                };
                items.push(value.evaluate(ctx)?);
                Ok(Value::Array(items))
            }
        }
    }

    /// Collect every path this expression reads.
    pub fn collect_paths(&self, out: &mut Vec<String>) {
        match self {
            Expr::Lit { .. } => {}
            Expr::Get { path } => out.push(path.clone()),
            Expr::Eq { left, right }
            | Expr::Neq { left, right }
            | Expr::Gt { left, right }
            | Expr::Gte { left, right }
            | Expr::Lt { left, right }
            | Expr::Lte { left, right }
            | Expr::Add { left, right }
            | Expr::Sub { left, right }
            | Expr::Mul { left, right }
            | Expr::Div { left, right }
            | Expr::Mod { left, right } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Expr::And { args } | Expr::Or { args } | Expr::Concat { args } | Expr::Coalesce { args } => {
                for arg in args {
                    arg.collect_paths(out);
                }
            }
            Expr::Not { arg } | Expr::Len { arg } | Expr::IsNull { arg } => arg.collect_paths(out),
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_paths(out);
                then.collect_paths(out);
                otherwise.collect_paths(out);
            }
            Expr::Object { fields } => {
                for expr in fields.values() {
                    expr.collect_paths(out);
                }
            }
            Expr::Append { array, value } => {
                array.collect_paths(out);
                value.collect_paths(out);
            }
        }
    }

    /// Names of computed fields this expression reads (`computed.<name>...`).
    pub fn computed_dependencies(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        let mut deps: Vec<String> = paths
            .iter()
            .filter_map(|p| p.strip_prefix("computed."))
            .map(|rest| rest.split('.').next().unwrap_or(rest).to_string())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

fn expect_bool(value: &Value, op: &str) -> Result<bool, ExprError> {
    value.as_bool().ok_or_else(|| {
        ExprError::type_mismatch(format!("{} expects boolean, got {}", op, json_type_name(value)))
    })
}

fn division_by_zero() -> ExprError {
    ExprError {
        code: ErrorCode::ValidationError,
        message: "division by zero".to_string(),
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, ExprError> {
    let (l, r) = (left.evaluate(ctx)?, right.evaluate(ctx)?);
    let ordering = match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.map(|o| Value::Bool(accept(o))).ok_or_else(|| {
        ExprError::type_mismatch(format!(
            "cannot compare {} with {}",
            json_type_name(&l),
            json_type_name(&r)
        ))
    })
}

fn arithmetic(
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    op: &str,
    apply: impl Fn(f64, f64) -> Result<f64, ExprError>,
) -> Result<Value, ExprError> {
    let (l, r) = (left.evaluate(ctx)?, right.evaluate(ctx)?);
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => number_value(apply(a, b)?),
        _ => Err(ExprError::type_mismatch(format!(
            "{} expects numbers, got {} and {}",
            op,
            json_type_name(&l),
            json_type_name(&r)
        ))),
    }
}

/// Integral results are emitted as integers so `1 + 1` stays `2`, not `2.0`.
fn number_value(n: f64) -> Result<Value, ExprError> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExprError {
            code: ErrorCode::ValidationError,
            message: "arithmetic produced a non-finite number".to_string(),
        })
}

fn concat(args: &[Expr], ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
    let values = args
        .iter()
        .map(|a| a.evaluate(ctx))
        .collect::<Result<Vec<_>, _>>()?;

    if !values.is_empty() && values.iter().all(Value::is_array) {
        let joined = values
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items,
                _ => Vec::new(),
            })
            .collect();
        return Ok(Value::Array(joined));
    }

    let mut out = String::new();
    for value in &values {
        match value {
            Value::String(s) => out.push_str(s),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            other => {
                return Err(ExprError::type_mismatch(format!(
                    "concat cannot stringify {}",
                    json_type_name(other)
                )))
            }
        }
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(data: Value) -> Snapshot {
        let mut snap = Snapshot::new(data, "hash");
        snap.input = json!({"title": "milk"});
        snap.computed.insert("count".to_string(), json!(2));
        snap
    }

    fn eval(expr: Value, snap: &Snapshot) -> Result<Value, ExprError> {
        let expr: Expr = serde_json::from_value(expr).unwrap();
        expr.evaluate(&EvalContext::new(snap))
    }

    #[test]
    fn test_get_roots() {
        let snap = snapshot(json!({"todos": [], "user": {"name": "ada"}}));
        assert_eq!(eval(json!({"kind": "get", "path": "user.name"}), &snap).unwrap(), json!("ada"));
        assert_eq!(eval(json!({"kind": "get", "path": "data.user.name"}), &snap).unwrap(), json!("ada"));
        assert_eq!(eval(json!({"kind": "get", "path": "input.title"}), &snap).unwrap(), json!("milk"));
        assert_eq!(eval(json!({"kind": "get", "path": "computed.count"}), &snap).unwrap(), json!(2));
        assert_eq!(eval(json!({"kind": "get", "path": "meta.version"}), &snap).unwrap(), json!(0));
        assert_eq!(eval(json!({"kind": "get", "path": "nope.deeper"}), &snap).unwrap(), Value::Null);
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        let snap = snapshot(json!({"n": 3}));
        let sum = eval(
            json!({"kind": "add", "left": {"kind": "get", "path": "n"}, "right": {"kind": "lit", "value": 1}}),
            &snap,
        )
        .unwrap();
        assert_eq!(sum, json!(4));

        let half = eval(
            json!({"kind": "div", "left": {"kind": "lit", "value": 3}, "right": {"kind": "lit", "value": 2}}),
            &snap,
        )
        .unwrap();
        assert_eq!(half, json!(1.5));
    }

    #[test]
    fn test_division_by_zero() {
        let snap = snapshot(json!({}));
        let err = eval(
            json!({"kind": "div", "left": {"kind": "lit", "value": 1}, "right": {"kind": "lit", "value": 0}}),
            &snap,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_type_mismatch_in_logic() {
        let snap = snapshot(json!({"flag": "yes"}));
        let err = eval(json!({"kind": "not", "arg": {"kind": "get", "path": "flag"}}), &snap).unwrap_err();
        assert_eq!(err.code, ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_comparison_and_loose_equality() {
        let snap = snapshot(json!({"a": 1, "b": 1.0}));
        let eq = eval(
            json!({"kind": "eq", "left": {"kind": "get", "path": "a"}, "right": {"kind": "get", "path": "b"}}),
            &snap,
        )
        .unwrap();
        assert_eq!(eq, json!(true));

        let gt = eval(
            json!({"kind": "gt", "left": {"kind": "lit", "value": "b"}, "right": {"kind": "lit", "value": "a"}}),
            &snap,
        )
        .unwrap();
        assert_eq!(gt, json!(true));
    }

    #[test]
    fn test_append_and_object() {
        let snap = snapshot(json!({"todos": [{"title": "eggs"}]}));
        let appended = eval(
            json!({
                "kind": "append",
                "array": {"kind": "get", "path": "todos"},
                "value": {"kind": "object", "fields": {"title": {"kind": "get", "path": "input.title"}}}
            }),
            &snap,
        )
        .unwrap();
        assert_eq!(appended, json!([{"title": "eggs"}, {"title": "milk"}]));
    }

    #[test]
    fn test_computed_dependencies() {
        let expr: Expr = serde_json::from_value(json!({
            "kind": "add",
            "left": {"kind": "get", "path": "computed.a.inner"},
            "right": {"kind": "get", "path": "todos"}
        }))
        .unwrap();
        assert_eq!(expr.computed_dependencies(), vec!["a".to_string()]);
    }
}
