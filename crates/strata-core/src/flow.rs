//! Declarative per-action flow graphs.
//!
//! A flow is a tree of nodes evaluated in order. Evaluation itself lives in
//! `strata-compute`; this module only defines the shape and node addressing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::expr::Expr;

/// Path of the flow root.
pub const ROOT_NODE_PATH: &str = "root";

/// Patch operation a `patch` node emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Set,
    Merge,
    Unset,
}

/// A flow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlowNode {
    /// Ordered steps; later steps observe earlier steps' patches.
    Seq { steps: Vec<FlowNode> },

    /// Boolean gate.
    #[serde(alias = "cond")]
    If {
        cond: Expr,
        then: Box<FlowNode>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<FlowNode>>,
    },

    /// Emit one patch against the working snapshot.
    Patch {
        op: PatchOp,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },

    /// Emit a requirement and suspend the flow.
    Effect {
        #[serde(rename = "type")]
        effect_type: String,
        #[serde(default)]
        params: BTreeMap<String, Expr>,
    },

    /// Terminate with status `halted`.
    Halt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Terminate with status `error`.
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        message: String,
    },
}

impl FlowNode {
    /// Short kind name used in traces.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowNode::Seq { .. } => "seq",
            FlowNode::If { .. } => "if",
            FlowNode::Patch { .. } => "patch",
            FlowNode::Effect { .. } => "effect",
            FlowNode::Halt { .. } => "halt",
            FlowNode::Fail { .. } => "fail",
        }
    }

    /// Nesting depth (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        match self {
            FlowNode::Seq { steps } => 1 + steps.iter().map(FlowNode::depth).max().unwrap_or(0),
            FlowNode::If {
                then, otherwise, ..
            } => {
                let else_depth = otherwise.as_ref().map(|n| n.depth()).unwrap_or(0);
                1 + then.depth().max(else_depth)
            }
            _ => 1,
        }
    }
}

/// One hop in a node path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStep {
    /// Index into a `seq`'s steps.
    Step(usize),
    /// The `then` branch of an `if`.
    Then,
    /// The `else` branch of an `if`.
    Else,
}

/// Child path for the `index`th step of a sequence.
pub fn step_path(parent: &str, index: usize) -> String {
    format!("{}.steps.{}", parent, index)
}

/// Child path for a branch of a conditional.
pub fn branch_path(parent: &str, then: bool) -> String {
    format!("{}.{}", parent, if then { "then" } else { "else" })
}

/// Parse a dotted node path into hops. Returns `None` for malformed paths.
pub fn parse_node_path(path: &str) -> Option<Vec<NodeStep>> {
    let mut parts = path.split('.');
    if parts.next()? != ROOT_NODE_PATH {
        return None;
    }
    let mut hops = Vec::new();
    while let Some(part) = parts.next() {
        match part {
            "steps" => hops.push(NodeStep::Step(parts.next()?.parse().ok()?)),
            "then" => hops.push(NodeStep::Then),
            "else" => hops.push(NodeStep::Else),
            _ => return None,
        }
    }
    Some(hops)
}
