//! Flow evaluator.
//!
//! Walks an action's flow graph against a working snapshot. Each node takes the
//! current [`FlowState`] and returns the updated state plus a trace entry.
//! Patches take effect on the working snapshot immediately, so later steps
//! observe them. An effect node emits a requirement and suspends the flow.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use strata_core::flow::{branch_path, step_path, NodeStep};
use strata_core::{
    DomainSchema, ErrorCode, ErrorValue, EvalContext, Expr, FlowNode, FlowPosition, FlowStatus, HostContext,
    Patch, PatchOp, Requirement, Snapshot, TraceTree,
};
use tracing::debug;

use crate::apply::{apply_patch, PatchOutcome};

/// State threaded through flow evaluation.
#[derive(Debug, Clone)]
pub struct FlowState {
    /// Working snapshot with every patch so far applied to `data`.
    pub snapshot: Snapshot,

    /// Patches emitted, in order.
    pub patches: Vec<Patch>,

    /// Requirements emitted.
    pub requirements: Vec<Requirement>,

    pub status: FlowStatus,

    /// Business errors raised during evaluation.
    pub errors: Vec<ErrorValue>,

    pub halt_reason: Option<String>,
}

impl FlowState {
    /// Fresh running state over a working snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            patches: Vec::new(),
            requirements: Vec::new(),
            status: FlowStatus::Running,
            errors: Vec::new(),
            halt_reason: None,
        }
    }

    fn fail(&mut self, error: ErrorValue) {
        self.errors.push(error);
        self.status = FlowStatus::Error;
    }
}

/// Evaluates one action's flow.
pub struct FlowEvaluator<'a> {
    schema: &'a DomainSchema,
    action_id: &'a str,
    intent_id: &'a str,
    host: &'a HostContext,
    /// Version of the snapshot the pass started from; requirement ids derive from it.
    base_version: u64,
}

impl<'a> FlowEvaluator<'a> {
    pub fn new(
        schema: &'a DomainSchema,
        action_id: &'a str,
        intent_id: &'a str,
        host: &'a HostContext,
        base_version: u64,
    ) -> Self {
        Self {
            schema,
            action_id,
            intent_id,
            host,
            base_version,
        }
    }

    /// Evaluate a flow from `root_path`.
    ///
    /// With `resume` set, evaluation descends the recorded hops to a suspended
    /// effect node without re-evaluating conditions, treats that node as done,
    /// and continues with whatever follows it.
    pub fn evaluate(
        &self,
        flow: &FlowNode,
        root_path: &str,
        state: FlowState,
        resume: Option<&[NodeStep]>,
    ) -> (FlowState, TraceTree) {
        self.eval_node(flow, root_path, state, resume)
    }

    fn eval_node(
        &self,
        node: &FlowNode,
        path: &str,
        mut state: FlowState,
        resume: Option<&[NodeStep]>,
    ) -> (FlowState, TraceTree) {
        if let Some([]) = resume {
            debug!(path, "resuming past suspended node");
            let trace = TraceTree::leaf(node.kind(), path).with_output(json!({ "resumed": true }));
            return (state, trace);
        }

        match node {
            FlowNode::Seq { steps } => self.eval_seq(steps, path, state, resume),
            FlowNode::If {
                cond,
                then,
                otherwise,
            } => self.eval_if(cond, then, otherwise.as_deref(), path, state, resume),
            _ if resume.is_some() => {
                state.fail(self.error(
                    ErrorCode::ValidationError,
                    format!("resume path does not match the flow at '{}'", path),
                    path,
                ));
                (state, TraceTree::leaf(node.kind(), path).with_output(json!({ "error": "resume mismatch" })))
            }
            FlowNode::Patch { op, path: target, value } => self.eval_patch(*op, target, value.as_ref(), path, state),
            FlowNode::Effect { effect_type, params } => self.eval_effect(effect_type, params, path, state),
            FlowNode::Halt { reason } => {
                state.status = FlowStatus::Halted;
                state.halt_reason = reason.clone();
                let trace = TraceTree::leaf("halt", path).with_output(json!({ "reason": reason }));
                (state, trace)
            }
            FlowNode::Fail { code, message } => {
                let code = code.unwrap_or(ErrorCode::FlowFailed);
                state.fail(self.error(code, message.clone(), path));
                let trace = TraceTree::leaf("fail", path).with_output(json!({ "code": code, "message": message }));
                (state, trace)
            }
        }
    }

    fn eval_seq(
        &self,
        steps: &[FlowNode],
        path: &str,
        mut state: FlowState,
        resume: Option<&[NodeStep]>,
    ) -> (FlowState, TraceTree) {
        let mut trace = TraceTree::leaf("seq", path);

        let (start, mut child_resume) = match resume {
            None => (0, None),
            Some([NodeStep::Step(index), rest @ ..]) if *index < steps.len() => (*index, Some(rest)),
            Some(_) => {
                state.fail(self.error(
                    ErrorCode::ValidationError,
                    format!("resume path does not match the sequence at '{}'", path),
                    path,
                ));
                return (state, trace.with_output(json!({ "error": "resume mismatch" })));
            }
        };

        for (index, step) in steps.iter().enumerate().skip(start) {
            let child_path = step_path(path, index);
            let (next, child) = self.eval_node(step, &child_path, state, child_resume.take());
            state = next;
            trace.push(child);
            if state.status.is_stopped() {
                break;
            }
        }
        (state, trace)
    }

    fn eval_if(
        &self,
        cond: &Expr,
        then: &FlowNode,
        otherwise: Option<&FlowNode>,
        path: &str,
        mut state: FlowState,
        resume: Option<&[NodeStep]>,
    ) -> (FlowState, TraceTree) {
        let trace = TraceTree::leaf("if", path);

        let (taken, child_resume) = match resume {
            Some([NodeStep::Then, rest @ ..]) => (true, Some(rest)),
            Some([NodeStep::Else, rest @ ..]) if otherwise.is_some() => (false, Some(rest)),
            Some(_) => {
                state.fail(self.error(
                    ErrorCode::ValidationError,
                    format!("resume path does not match the conditional at '{}'", path),
                    path,
                ));
                return (state, trace.with_output(json!({ "error": "resume mismatch" })));
            }
            None => {
                let value = match cond.evaluate(&EvalContext::new(&state.snapshot)) {
                    Ok(value) => value,
                    Err(err) => {
                        state.fail(self.error(err.code, err.message, path));
                        return (state, trace.with_output(json!({ "error": err.code })));
                    }
                };
                match value.as_bool() {
                    Some(taken) => (taken, None),
                    None => {
                        state.fail(self.error(
                            ErrorCode::TypeMismatch,
                            format!("condition at '{}' evaluated to {}, not a boolean", path, value),
                            path,
                        ));
                        return (state, trace.with_inputs(json!({ "cond": value })));
                    }
                }
            }
        };

        let mut trace = trace.with_inputs(json!({ "cond": taken })).with_output(json!({ "branch": if taken { "then" } else { "else" } }));
        let branch = if taken { Some(then) } else { otherwise };
        match branch {
            Some(node) => {
                let (state, child) = self.eval_node(node, &branch_path(path, taken), state, child_resume);
                trace.push(child);
                (state, trace)
            }
            None => (state, trace),
        }
    }

    fn eval_patch(
        &self,
        op: PatchOp,
        target: &str,
        value: Option<&Expr>,
        path: &str,
        mut state: FlowState,
    ) -> (FlowState, TraceTree) {
        let trace = TraceTree::leaf("patch", path);

        let evaluated = match value {
            Some(expr) => match expr.evaluate(&EvalContext::new(&state.snapshot)) {
                Ok(value) => value,
                Err(err) => {
                    state.fail(self.error(err.code, err.message, path));
                    return (state, trace.with_output(json!({ "error": err.code })));
                }
            },
            None => Value::Null,
        };

        let patch = match op {
            PatchOp::Set => Patch::set(target, evaluated),
            PatchOp::Unset => Patch::unset(target),
            PatchOp::Merge => match evaluated {
                Value::Object(map) => Patch::Merge {
                    path: target.to_string(),
                    value: map,
                },
                Value::Null => Patch::Merge {
                    path: target.to_string(),
                    value: Map::new(),
                },
                other => {
                    state.fail(self.error(
                        ErrorCode::TypeMismatch,
                        format!("merge value for '{}' must be an object", target),
                        path,
                    ));
                    return (state, trace.with_inputs(json!({ "value": other })));
                }
            },
        };

        let trace = trace.with_inputs(serde_json::to_value(&patch).unwrap_or(Value::Null));
        match apply_patch(self.schema, &mut state.snapshot.data, &patch, self.host.now) {
            Ok(outcome) => {
                if outcome == PatchOutcome::Applied {
                    state.patches.push(patch);
                }
                (state, trace.with_output(json!({ "applied": outcome == PatchOutcome::Applied })))
            }
            Err(err) => {
                let code = err.code;
                state.fail(err.with_action(self.action_id).with_node_path(path));
                (state, trace.with_output(json!({ "error": code })))
            }
        }
    }

    fn eval_effect(
        &self,
        effect_type: &str,
        params: &BTreeMap<String, Expr>,
        path: &str,
        mut state: FlowState,
    ) -> (FlowState, TraceTree) {
        let trace = TraceTree::leaf("effect", path);

        let mut evaluated = Map::new();
        for (name, expr) in params {
            match expr.evaluate(&EvalContext::new(&state.snapshot)) {
                Ok(value) => {
                    evaluated.insert(name.clone(), value);
                }
                Err(err) => {
                    state.fail(self.error(err.code, format!("effect param '{}': {}", name, err.message), path));
                    return (state, trace.with_output(json!({ "error": err.code })));
                }
            }
        }

        let requirement = Requirement {
            id: Requirement::derive_id(self.intent_id, path, self.base_version),
            effect_type: effect_type.to_string(),
            params: Value::Object(evaluated),
            action_id: self.action_id.to_string(),
            intent_id: self.intent_id.to_string(),
            flow_position: FlowPosition {
                node_path: path.to_string(),
                snapshot_version: self.base_version,
            },
            created_at: self.host.now,
        };
        debug!(requirement = %requirement.id, effect = effect_type, "flow suspended on effect");

        let trace = trace
            .with_inputs(requirement.params.clone())
            .with_output(json!({ "requirementId": requirement.id }));
        state.requirements.push(requirement);
        state.status = FlowStatus::Pending;
        (state, trace)
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>, path: &str) -> ErrorValue {
        ErrorValue::new(code, message, self.host.now)
            .with_action(self.action_id)
            .with_node_path(path)
    }
}
