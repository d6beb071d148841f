//! Compute engine.
//!
//! Orchestrates one intent: validates it against the schema, runs the action's
//! flow, re-derives computed fields and packages the outcome as a
//! [`ComputeResult`]. Pure: the same inputs always give the same result.
//!
//! Business failures come back as `Ok` with status `error` and an
//! [`ErrorValue`] recorded on the snapshot. Only contract violations, such as
//! an intent without an id, return `Err`.

use serde_json::{json, Value};
use strata_core::flow::{parse_node_path, NodeStep, ROOT_NODE_PATH};
use strata_core::trace::TraceHeader;
use strata_core::{
    ActionSpec, ComputeStatus, DomainSchema, ErrorCode, ErrorValue, EvalContext, HostContext, Intent,
    Patch, Requirement, Result, Snapshot, SystemStatus, TraceGraph, TraceTree,
};
use tracing::{debug, info};

use crate::apply::{apply_patches_report, ApplyReport};
use crate::computed::refresh_computed;
use crate::config::ComputeConfig;
use crate::flow::{FlowEvaluator, FlowState};

/// Outcome of one compute pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeResult {
    /// Candidate snapshot: patches applied, computed re-derived, version bumped.
    pub snapshot: Snapshot,

    /// Patches the flow emitted, already reflected in `snapshot`.
    pub patches: Vec<Patch>,

    /// Requirements newly pending after this pass.
    pub requirements: Vec<Requirement>,

    pub trace: TraceGraph,

    pub status: ComputeStatus,

    /// Reason given by a `halt` node.
    pub halt_reason: Option<String>,
}

impl ComputeResult {
    /// The error that ended the pass, if it ended in error.
    pub fn error(&self) -> Option<&ErrorValue> {
        if self.status == ComputeStatus::Error {
            self.snapshot.system.last_error.as_ref()
        } else {
            None
        }
    }
}

/// The compute engine.
#[derive(Debug, Clone, Default)]
pub struct ComputeEngine {
    config: ComputeConfig,
}

impl ComputeEngine {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom configuration.
    pub fn with_config(config: ComputeConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    /// Run an intent's action against a snapshot.
    pub fn compute(
        &self,
        schema: &DomainSchema,
        snapshot: &Snapshot,
        intent: &Intent,
        host: &HostContext,
    ) -> Result<ComputeResult> {
        let pass = Pass::new(self, schema, snapshot, intent, host);

        let problems = schema.problems(self.config.max_flow_depth);
        if !problems.is_empty() {
            let err = pass.error(ErrorCode::ValidationError, format!("invalid schema: {}", problems.join("; ")));
            return Ok(pass.rejected(snapshot.clone(), err));
        }

        intent.validate()?;

        let mut working = snapshot.clone();
        if let Some(err) = refresh_computed(schema, &mut working, host.now) {
            return Ok(pass.rejected(working, err.with_action(&intent.intent_type)));
        }

        let Some(action) = schema.action(&intent.intent_type) else {
            let err = pass.error(
                ErrorCode::UnknownAction,
                format!("unknown action '{}'", intent.intent_type),
            );
            return Ok(pass.rejected(working, err));
        };

        if let Some(err) = pass.check_input(action) {
            return Ok(pass.rejected(working, err));
        }

        working.input = intent.input.clone();
        if let Some(err) = pass.check_available(action, &working) {
            working.input = snapshot.input.clone();
            return Ok(pass.rejected(working, err));
        }

        working.system.status = SystemStatus::Computing;
        working.system.current_action = Some(intent.intent_type.clone());

        debug!(intent_id = %intent.intent_id, action = %intent.intent_type, "evaluating flow");
        Ok(pass.run(action, working, None))
    }

    /// Resume a suspended flow after its effect was fulfilled.
    ///
    /// `node_path` is the flow position recorded on the fulfilled requirement.
    /// Input and availability checks already passed when the intent started
    /// and are not repeated.
    pub fn resume(
        &self,
        schema: &DomainSchema,
        snapshot: &Snapshot,
        intent: &Intent,
        node_path: &str,
        host: &HostContext,
    ) -> Result<ComputeResult> {
        intent.validate()?;
        let pass = Pass::new(self, schema, snapshot, intent, host);

        let Some(action) = schema.action(&intent.intent_type) else {
            let err = pass.error(
                ErrorCode::UnknownAction,
                format!("unknown action '{}'", intent.intent_type),
            );
            return Ok(pass.rejected(snapshot.clone(), err));
        };

        let Some(hops) = parse_node_path(node_path) else {
            let err = pass
                .error(ErrorCode::ValidationError, format!("malformed flow position '{}'", node_path))
                .with_node_path(node_path);
            return Ok(pass.rejected(snapshot.clone(), err));
        };

        let mut working = snapshot.clone();
        working.input = intent.input.clone();
        working.system.status = SystemStatus::Computing;
        working.system.current_action = Some(intent.intent_type.clone());

        debug!(intent_id = %intent.intent_id, node_path, "resuming flow");
        Ok(pass.run(action, working, Some(&hops)))
    }

    /// Apply patches outside of any flow.
    pub fn apply(&self, schema: &DomainSchema, snapshot: &Snapshot, patches: &[Patch], host: &HostContext) -> Snapshot {
        self.apply_report(schema, snapshot, patches, host).snapshot
    }

    /// Apply patches and report how many applied and whether one failed.
    pub fn apply_report(
        &self,
        schema: &DomainSchema,
        snapshot: &Snapshot,
        patches: &[Patch],
        host: &HostContext,
    ) -> ApplyReport {
        let mut report = apply_patches_report(schema, snapshot, patches, host);
        trim_errors(&mut report.snapshot, self.config.max_errors_retained);
        report
    }

    /// Record a failure that happened outside compute, such as a failed
    /// effect, and advance the version.
    pub fn record_failure(&self, snapshot: &Snapshot, error: ErrorValue, host: &HostContext) -> Snapshot {
        let mut next = snapshot.clone();
        next.record_error(error);
        trim_errors(&mut next, self.config.max_errors_retained);
        next.advance(host);
        next
    }
}

/// Run an intent with the default engine.
pub fn compute(schema: &DomainSchema, snapshot: &Snapshot, intent: &Intent, host: &HostContext) -> Result<ComputeResult> {
    ComputeEngine::default().compute(schema, snapshot, intent, host)
}

/// Apply patches with the default engine.
pub fn apply(schema: &DomainSchema, snapshot: &Snapshot, patches: &[Patch], host: &HostContext) -> Snapshot {
    ComputeEngine::default().apply(schema, snapshot, patches, host)
}

/// Inputs shared by every step of one pass.
struct Pass<'a> {
    engine: &'a ComputeEngine,
    schema: &'a DomainSchema,
    intent: &'a Intent,
    host: &'a HostContext,
    base_version: u64,
}

impl<'a> Pass<'a> {
    fn new(
        engine: &'a ComputeEngine,
        schema: &'a DomainSchema,
        snapshot: &Snapshot,
        intent: &'a Intent,
        host: &'a HostContext,
    ) -> Self {
        Self {
            engine,
            schema,
            intent,
            host,
            base_version: snapshot.meta.version,
        }
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> ErrorValue {
        ErrorValue::new(code, message, self.host.now).with_action(&self.intent.intent_type)
    }

    fn check_input(&self, action: &ActionSpec) -> Option<ErrorValue> {
        let spec = action.input.as_ref()?;
        let input = match &self.intent.input {
            Value::Null if spec.is_object() => json!({}),
            other => other.clone(),
        };
        spec.check(&input, "input")
            .err()
            .map(|msg| self.error(ErrorCode::InvalidInput, msg))
    }

    fn check_available(&self, action: &ActionSpec, working: &Snapshot) -> Option<ErrorValue> {
        let guard = action.available.as_ref()?;
        match guard.evaluate(&EvalContext::new(working)) {
            Ok(Value::Bool(true)) => None,
            Ok(Value::Bool(false)) => Some(self.error(
                ErrorCode::ActionUnavailable,
                format!("action '{}' is not available", self.intent.intent_type),
            )),
            Ok(other) => Some(self.error(
                ErrorCode::TypeMismatch,
                format!("availability guard yielded {}, not a boolean", other),
            )),
            Err(err) => Some(self.error(err.code, err.message)),
        }
    }

    fn run(&self, action: &ActionSpec, working: Snapshot, resume: Option<&[NodeStep]>) -> ComputeResult {
        let evaluator = FlowEvaluator::new(
            self.schema,
            &self.intent.intent_type,
            &self.intent.intent_id,
            self.host,
            self.base_version,
        );
        let (state, tree) = evaluator.evaluate(&action.flow, ROOT_NODE_PATH, FlowState::new(working), resume);
        self.finish(state, tree)
    }

    fn finish(&self, state: FlowState, tree: TraceTree) -> ComputeResult {
        let FlowState {
            mut snapshot,
            patches,
            requirements,
            status: flow_status,
            errors,
            halt_reason,
        } = state;

        let mut status = ComputeStatus::from(flow_status);

        let computed_error = refresh_computed(self.schema, &mut snapshot, self.host.now)
            .map(|err| err.with_action(&self.intent.intent_type));

        for err in errors.into_iter().chain(computed_error) {
            snapshot.record_error(err);
            status = ComputeStatus::Error;
        }

        snapshot
            .system
            .pending_requirements
            .extend(requirements.iter().cloned());

        snapshot.system.status = match status.system_status() {
            SystemStatus::Idle if !snapshot.system.pending_requirements.is_empty() => SystemStatus::Pending,
            other => other,
        };
        if status.is_terminal() {
            snapshot.input = Value::Null;
        }
        trim_errors(&mut snapshot, self.engine.config.max_errors_retained);
        snapshot.advance(self.host);

        let trace = self.trace(tree, &snapshot, status);
        info!(
            intent_id = %self.intent.intent_id,
            action = %self.intent.intent_type,
            status = ?status,
            version = snapshot.meta.version,
            "compute finished"
        );

        ComputeResult {
            snapshot,
            patches,
            requirements,
            trace,
            status,
            halt_reason,
        }
    }

    /// Result for a pass rejected before its flow ran.
    fn rejected(&self, mut snapshot: Snapshot, error: ErrorValue) -> ComputeResult {
        debug!(intent_id = %self.intent.intent_id, code = %error.code, "intent rejected");
        let tree = TraceTree::leaf("guard", ROOT_NODE_PATH).with_output(json!({
            "code": error.code,
            "message": error.message,
        }));

        snapshot.record_error(error);
        trim_errors(&mut snapshot, self.engine.config.max_errors_retained);
        snapshot.advance(self.host);

        let trace = self.trace(tree, &snapshot, ComputeStatus::Error);
        ComputeResult {
            snapshot,
            patches: Vec::new(),
            requirements: Vec::new(),
            trace,
            status: ComputeStatus::Error,
            halt_reason: None,
        }
    }

    fn trace(&self, tree: TraceTree, snapshot: &Snapshot, status: ComputeStatus) -> TraceGraph {
        TraceGraph::from_tree(
            tree,
            TraceHeader {
                intent_id: self.intent.intent_id.clone(),
                action_id: self.intent.intent_type.clone(),
                base_version: self.base_version,
                result_version: snapshot.meta.version,
                terminated_by: status,
                timestamp: self.host.now,
                duration_ms: self.host.duration_ms,
            },
        )
    }
}

fn trim_errors(snapshot: &mut Snapshot, max: usize) {
    let errors = &mut snapshot.system.errors;
    if errors.len() > max {
        let excess = errors.len() - max;
        errors.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::StrataError;

    fn schema() -> DomainSchema {
        DomainSchema::from_json(json!({
            "id": "todo",
            "version": "1.0.0",
            "state": {"fields": {
                "todos": {"type": "array", "default": []},
                "loading": {"type": "boolean", "default": false},
                "locked": {"type": "boolean", "default": false}
            }},
            "computed": {"fields": {
                "count": {"expr": {"kind": "len", "arg": {"kind": "get", "path": "todos"}}}
            }},
            "actions": {
                "add": {
                    "input": {"type": "object", "fields": {"title": {"type": "string", "required": true}}},
                    "available": {"kind": "not", "arg": {"kind": "get", "path": "locked"}},
                    "flow": {"kind": "patch", "op": "set", "path": "todos",
                             "value": {"kind": "append", "array": {"kind": "get", "path": "todos"}, "value": {"kind": "get", "path": "input.title"}}}
                },
                "load": {"flow": {"kind": "seq", "steps": [
                    {"kind": "patch", "op": "set", "path": "loading", "value": {"kind": "lit", "value": true}},
                    {"kind": "effect", "type": "api.fetch", "params": {"loading": {"kind": "get", "path": "loading"}}},
                    {"kind": "patch", "op": "set", "path": "loading", "value": {"kind": "lit", "value": false}}
                ]}},
                "stop": {"flow": {"kind": "halt", "reason": "nothing to do"}},
                "guarded": {"available": {"kind": "get", "path": "todos"}, "flow": {"kind": "halt"}}
            }
        }))
        .unwrap()
    }

    fn host() -> HostContext {
        HostContext::new(1_000, "seed-1")
    }

    fn intent(action: &str, input: Value) -> Intent {
        Intent::new(action, input, format!("{}-1", action))
    }

    #[test]
    fn test_complete_intent() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let result = compute(&schema, &snap, &intent("add", json!({"title": "milk"})), &host()).unwrap();

        assert_eq!(result.status, ComputeStatus::Complete);
        assert_eq!(result.snapshot.data["todos"], json!(["milk"]));
        assert_eq!(result.snapshot.computed["count"], json!(1));
        assert_eq!(result.snapshot.system.status, SystemStatus::Idle);
        assert_eq!(result.snapshot.meta.version, snap.meta.version + 1);
        assert_eq!(result.snapshot.meta.timestamp, 1_000);
        assert_eq!(result.snapshot.input, Value::Null);
        assert_eq!(result.patches.len(), 1);
    }

    #[test]
    fn test_missing_intent_id_is_contract_violation() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let err = compute(&schema, &snap, &Intent::new("add", json!({}), ""), &host()).unwrap_err();
        assert!(matches!(err, StrataError::MissingIntentId { .. }));
    }

    #[test]
    fn test_business_errors_are_values() {
        let schema = schema();
        let snap = schema.genesis_snapshot();

        let cases = [
            (intent("nope", json!({})), ErrorCode::UnknownAction),
            (intent("add", json!({"title": 3})), ErrorCode::InvalidInput),
            (intent("add", json!({})), ErrorCode::InvalidInput),
            (intent("guarded", json!({})), ErrorCode::TypeMismatch),
        ];
        for (intent, code) in cases {
            let result = compute(&schema, &snap, &intent, &host()).unwrap();
            assert_eq!(result.status, ComputeStatus::Error);
            assert_eq!(result.error().unwrap().code, code);
            assert_eq!(result.snapshot.system.status, SystemStatus::Error);
            assert_eq!(result.snapshot.meta.version, 1);
        }
    }

    #[test]
    fn test_unavailable_action() {
        let schema = schema();
        let mut snap = schema.genesis_snapshot();
        snap.data["locked"] = json!(true);
        let result = compute(&schema, &snap, &intent("add", json!({"title": "x"})), &host()).unwrap();
        assert_eq!(result.error().unwrap().code, ErrorCode::ActionUnavailable);
        assert_eq!(result.snapshot.data["todos"], json!([]));
    }

    #[test]
    fn test_effect_leaves_pending_requirement() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let result = compute(&schema, &snap, &intent("load", json!({})), &host()).unwrap();

        assert_eq!(result.status, ComputeStatus::Pending);
        assert_eq!(result.snapshot.system.status, SystemStatus::Pending);
        assert_eq!(result.snapshot.data["loading"], json!(true));
        assert_eq!(result.requirements.len(), 1);
        assert_eq!(result.requirements[0].params["loading"], json!(true));
        assert_eq!(result.snapshot.system.pending_requirements, result.requirements);
        assert_eq!(result.snapshot.input, json!({}));
    }

    #[test]
    fn test_resume_runs_remaining_steps() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let load = intent("load", json!({}));
        let started = compute(&schema, &snap, &load, &host()).unwrap();

        let mut fulfilled = started.snapshot.clone();
        let req = fulfilled.take_requirement(&started.requirements[0].id).unwrap();
        let engine = ComputeEngine::new();
        let resumed = engine
            .resume(&schema, &fulfilled, &load, &req.flow_position.node_path, &host())
            .unwrap();

        assert_eq!(resumed.status, ComputeStatus::Complete);
        assert_eq!(resumed.snapshot.data["loading"], json!(false));
        assert_eq!(resumed.snapshot.system.status, SystemStatus::Idle);
        assert!(resumed.requirements.is_empty());
        assert_eq!(resumed.snapshot.meta.version, 2);
    }

    #[test]
    fn test_halt_maps_to_idle() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let result = compute(&schema, &snap, &intent("stop", json!({})), &host()).unwrap();
        assert_eq!(result.status, ComputeStatus::Halted);
        assert_eq!(result.halt_reason.as_deref(), Some("nothing to do"));
        assert_eq!(result.snapshot.system.status, SystemStatus::Idle);
    }

    #[test]
    fn test_deterministic() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let load = intent("load", json!({}));

        let a = compute(&schema, &snap, &load, &host()).unwrap();
        let b = compute(&schema, &snap, &load, &host()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.trace.digest(), b.trace.digest());
    }

    #[test]
    fn test_cycle_reported_and_computed_reset() {
        let schema = DomainSchema::from_json(json!({
            "id": "cyclic",
            "version": "1",
            "computed": {"fields": {
                "a": {"expr": {"kind": "get", "path": "computed.b"}},
                "b": {"expr": {"kind": "get", "path": "computed.a"}}
            }},
            "actions": {"noop": {"flow": {"kind": "seq", "steps": []}}}
        }))
        .unwrap();
        let snap = schema.genesis_snapshot();
        let result = compute(&schema, &snap, &intent("noop", json!({})), &host()).unwrap();

        assert_eq!(result.status, ComputeStatus::Error);
        assert_eq!(result.error().unwrap().code, ErrorCode::CyclicDependency);
        assert!(result.snapshot.computed.is_empty());
        assert_eq!(result.snapshot.meta.version, 1);
    }

    #[test]
    fn test_trace_rooted_at_flow() {
        let schema = schema();
        let snap = schema.genesis_snapshot();
        let result = compute(&schema, &snap, &intent("load", json!({})), &host()).unwrap();

        let root = result.trace.root_node().unwrap();
        assert_eq!(root.kind, "seq");
        assert_eq!(root.children.len(), 2);
        assert_eq!(result.trace.terminated_by, ComputeStatus::Pending);
        assert_eq!(result.trace.result_version, 1);
    }

    #[test]
    fn test_errors_are_trimmed() {
        let schema = schema();
        let engine = ComputeEngine::with_config(ComputeConfig::default().with_max_errors_retained(2));
        let mut snap = schema.genesis_snapshot();
        for _ in 0..4 {
            snap = engine.compute(&schema, &snap, &intent("nope", json!({})), &host()).unwrap().snapshot;
        }
        assert_eq!(snap.system.errors.len(), 2);
        assert_eq!(snap.meta.version, 4);
    }
}
