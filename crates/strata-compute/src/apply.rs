//! Patch applier.
//!
//! Applies a patch list to a snapshot and returns a new one. Patches are
//! validated against the schema field tree, except under the platform
//! namespace (`$`-prefixed roots), where only the root must be an object.

use serde_json::{json, Map, Value};
use strata_core::path::{get_at, json_type_name, remove_at, set_at, split_path, PLATFORM_NAMESPACE_PREFIX};
use strata_core::{DomainSchema, ErrorCode, ErrorValue, FieldResolution, FieldType, HostContext, Patch, Snapshot};
use tracing::{debug, warn};

use crate::computed::refresh_computed;

/// What happened to one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// Targets a read-only root (`computed`, `meta`); dropped without error.
    Ignored,
}

/// Result of applying a patch list.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub snapshot: Snapshot,

    /// Patches that changed data.
    pub applied: usize,

    /// The failure that stopped processing, also recorded on the snapshot.
    pub error: Option<ErrorValue>,
}

/// Apply patches to a snapshot.
///
/// The first failing patch stops processing: status becomes `error` and the
/// failure is recorded in `lastError`. Patches before it stay applied. The
/// version increments exactly once per call, failure or not.
pub fn apply_patches(
    schema: &DomainSchema,
    snapshot: &Snapshot,
    patches: &[Patch],
    host: &HostContext,
) -> Snapshot {
    apply_patches_report(schema, snapshot, patches, host).snapshot
}

/// Same as [`apply_patches`], also reporting what happened.
pub fn apply_patches_report(
    schema: &DomainSchema,
    snapshot: &Snapshot,
    patches: &[Patch],
    host: &HostContext,
) -> ApplyReport {
    let mut next = snapshot.clone();
    let mut applied = 0;
    let mut failure = None;

    for (index, patch) in patches.iter().enumerate() {
        match apply_patch(schema, &mut next.data, patch, host.now) {
            Ok(PatchOutcome::Applied) => applied += 1,
            Ok(PatchOutcome::Ignored) => {
                debug!(path = %patch.path(), "patch to read-only root ignored");
            }
            Err(err) => {
                warn!(index, path = %patch.path(), error = %err, "patch rejected");
                let context = json!({ "patchIndex": index, "op": patch.op(), "path": patch.path() });
                failure = Some(err.with_context(context));
                break;
            }
        }
    }

    // Patches before a failure stay applied, so computed must follow them.
    if let Some(derived) = refresh_computed(schema, &mut next, host.now) {
        match failure {
            Some(_) => next.record_error(derived),
            None => failure = Some(derived),
        }
    }
    if let Some(err) = &failure {
        next.record_error(err.clone());
    }

    next.advance(host);
    ApplyReport {
        snapshot: next,
        applied,
        error: failure,
    }
}

/// Apply one patch to a data tree.
pub fn apply_patch(
    schema: &DomainSchema,
    data: &mut Value,
    patch: &Patch,
    now: i64,
) -> Result<PatchOutcome, ErrorValue> {
    let path = patch.path();
    let segments = split_path(path);
    let Some(first) = segments.first() else {
        return Err(ErrorValue::new(ErrorCode::PathNotFound, "patch path is empty", now));
    };

    if matches!(*first, "computed" | "meta") {
        return Ok(PatchOutcome::Ignored);
    }

    if first.starts_with(PLATFORM_NAMESPACE_PREFIX) {
        check_platform(data, &segments, patch, now)?;
    } else {
        check_declared(schema, &segments, patch, now)?;
    }

    write(data, &segments, patch, now)?;
    Ok(PatchOutcome::Applied)
}

fn check_platform(data: &Value, segments: &[&str], patch: &Patch, now: i64) -> Result<(), ErrorValue> {
    let root = segments[0];
    if segments.len() == 1 {
        if let Patch::Set { value, .. } = patch {
            if !value.is_object() {
                return Err(mismatch(
                    format!("platform root '{}' must be an object, got {}", root, json_type_name(value)),
                    now,
                ));
            }
        }
        return Ok(());
    }

    match get_at(data, &segments[..1]) {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(other) => Err(mismatch(
            format!("platform root '{}' holds {}, not an object", root, json_type_name(other)),
            now,
        )),
    }
}

fn check_declared(schema: &DomainSchema, segments: &[&str], patch: &Patch, now: i64) -> Result<(), ErrorValue> {
    let path = segments.join(".");
    let spec = match schema.resolve_field(segments) {
        FieldResolution::NotFound => {
            return Err(ErrorValue::new(
                ErrorCode::PathNotFound,
                format!("path '{}' is not declared in the schema", path),
                now,
            ))
        }
        FieldResolution::Open => return Ok(()),
        FieldResolution::Declared(spec) => spec,
    };

    match patch {
        Patch::Set { value, .. } => spec.check(value, &path).map_err(|msg| mismatch(msg, now)),
        Patch::Merge { value, .. } => {
            if !matches!(spec.field_type, FieldType::Object | FieldType::Any) {
                return Err(mismatch(
                    format!("merge into '{}' which is declared {}", path, spec.field_type.as_str()),
                    now,
                ));
            }
            let Some(fields) = &spec.fields else {
                return Ok(());
            };
            for (key, child) in value {
                let Some(child_spec) = fields.get(key) else {
                    return Err(ErrorValue::new(
                        ErrorCode::PathNotFound,
                        format!("path '{}.{}' is not declared in the schema", path, key),
                        now,
                    ));
                };
                child_spec
                    .check(child, &format!("{}.{}", path, key))
                    .map_err(|msg| mismatch(msg, now))?;
            }
            Ok(())
        }
        Patch::Unset { .. } => Ok(()),
    }
}

fn write(data: &mut Value, segments: &[&str], patch: &Patch, now: i64) -> Result<(), ErrorValue> {
    let conflict = |at: String, found: &str| {
        mismatch(
            format!("cannot write '{}': '{}' holds {}", segments.join("."), at, found),
            now,
        )
    };

    match patch {
        Patch::Set { value, .. } => {
            set_at(data, segments, value.clone()).map_err(|c| conflict(c.at, c.found))
        }
        Patch::Merge { value, .. } => {
            let mut merged: Map<String, Value> = match get_at(data, segments) {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(existing)) => existing.clone(),
                Some(other) => {
                    return Err(mismatch(
                        format!("merge target '{}' holds {}", segments.join("."), json_type_name(other)),
                        now,
                    ))
                }
            };
            merged.extend(value.iter().map(|(k, v)| (k.clone(), v.clone())));
            set_at(data, segments, Value::Object(merged)).map_err(|c| conflict(c.at, c.found))
        }
        Patch::Unset { .. } => {
            remove_at(data, segments);
            Ok(())
        }
    }
}

fn mismatch(message: impl Into<String>, now: i64) -> ErrorValue {
    ErrorValue::new(ErrorCode::TypeMismatch, message, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::SystemStatus;

    fn schema() -> DomainSchema {
        DomainSchema::from_json(json!({
            "id": "profile",
            "version": "1",
            "state": {"fields": {
                "count": {"type": "number", "default": 0},
                "profile": {"type": "object"},
                "settings": {"type": "object", "fields": {
                    "theme": {"type": "string", "enum": ["light", "dark"]}
                }}
            }},
            "computed": {"fields": {
                "next": {"expr": {"kind": "add", "left": {"kind": "get", "path": "count"}, "right": {"kind": "lit", "value": 1}}}
            }}
        }))
        .unwrap()
    }

    fn host() -> HostContext {
        HostContext::new(1_000, "seed")
    }

    #[test]
    fn test_merge_creates_missing_path() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(
            &schema,
            &snap,
            &[Patch::merge("profile.meta", json!({"source": "import"}))],
            &host(),
        );

        assert_eq!(next.data["profile"]["meta"]["source"], json!("import"));
        assert_eq!(next.system.status, SystemStatus::Idle);
        assert_eq!(next.meta.version, snap.meta.version + 1);
    }

    #[test]
    fn test_merge_keeps_existing_keys() {
        let schema = schema();
        let mut snap = schema.genesis_snapshot();
        snap.data["profile"] = json!({"name": "ada"});
        let next = apply_patches(&schema, &snap, &[Patch::merge("profile", json!({"age": 3}))], &host());
        assert_eq!(next.data["profile"], json!({"name": "ada", "age": 3}));
    }

    #[test]
    fn test_platform_namespace_bypasses_schema() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(
            &schema,
            &snap,
            &[Patch::merge("$mel.guards.intent", json!({"seen": ["i-1"]}))],
            &host(),
        );

        assert_eq!(next.system.status, SystemStatus::Idle);
        assert_eq!(next.data["$mel"]["guards"]["intent"]["seen"], json!(["i-1"]));
    }

    #[test]
    fn test_platform_root_must_be_object() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(&schema, &snap, &[Patch::set("$mel", json!("x"))], &host());

        assert_eq!(next.system.status, SystemStatus::Error);
        assert_eq!(next.system.last_error.unwrap().code, ErrorCode::TypeMismatch);
        assert_eq!(next.meta.version, 1);
    }

    #[test]
    fn test_first_failure_stops() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(
            &schema,
            &snap,
            &[
                Patch::set("count", json!(4)),
                Patch::set("missing", json!(1)),
                Patch::set("count", json!(9)),
            ],
            &host(),
        );

        assert_eq!(next.data["count"], json!(4));
        let err = next.system.last_error.unwrap();
        assert_eq!(err.code, ErrorCode::PathNotFound);
        assert_eq!(err.context.unwrap()["patchIndex"], json!(1));
        assert_eq!(next.meta.version, 1);
    }

    #[test]
    fn test_partial_failure_keeps_computed_in_step() {
        let schema = schema();
        let snap = schema.genesis_snapshot();

        let next = apply_patches(
            &schema,
            &snap,
            &[Patch::set("count", json!(4)), Patch::set("missing", json!(1))],
            &host(),
        );

        assert_eq!(next.data["count"], json!(4));
        assert_eq!(next.computed["next"], json!(5));
        assert_eq!(next.system.status, SystemStatus::Error);
        assert_eq!(next.system.last_error.unwrap().code, ErrorCode::PathNotFound);
    }

    #[test]
    fn test_type_checked_against_field_tree() {
        let schema = schema();
        let snap = schema.genesis_snapshot();

        let next = apply_patches(&schema, &snap, &[Patch::set("count", json!("three"))], &host());
        assert_eq!(next.system.last_error.unwrap().code, ErrorCode::TypeMismatch);

        let next = apply_patches(&schema, &snap, &[Patch::merge("settings", json!({"theme": "blue"}))], &host());
        assert_eq!(next.system.last_error.unwrap().code, ErrorCode::TypeMismatch);

        let next = apply_patches(&schema, &snap, &[Patch::merge("count", json!({}))], &host());
        assert_eq!(next.system.last_error.unwrap().code, ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_computed_rederived_and_readonly_roots_ignored() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(
            &schema,
            &snap,
            &[Patch::set("count", json!(2)), Patch::set("computed.next", json!(99))],
            &host(),
        );

        assert_eq!(next.computed["next"], json!(3));
        assert_eq!(next.system.status, SystemStatus::Idle);
    }

    #[test]
    fn test_report_counts_applied() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let report = apply_patches_report(
            &schema,
            &snap,
            &[Patch::set("count", json!(1)), Patch::set("meta.version", json!(9))],
            &host(),
        );
        assert_eq!(report.applied, 1);
        assert!(report.error.is_none());
        assert_eq!(report.snapshot.meta.version, 1);
    }

    #[test]
    fn test_empty_patch_list_still_advances() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let next = apply_patches(&schema, &snap, &[], &host());
        assert_eq!(next.meta.version, 1);
        assert_eq!(next.meta.timestamp, 1_000);
    }
}
