//! Execution trace produced by one compute pass.
//!
//! Flow evaluation builds a nested [`TraceTree`]; compute flattens it into a
//! [`TraceGraph`] keyed by node id so observers can look nodes up directly.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::sha256_hex;
use crate::types::ComputeStatus;

/// Nested trace as built during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceTree {
    /// Node kind (`seq`, `patch`, `effect`, ... or `flow` for the synthetic root).
    pub kind: String,

    /// Flow node path this trace entry describes.
    pub source_path: String,

    #[serde(default)]
    pub inputs: Value,

    #[serde(default)]
    pub output: Value,

    #[serde(default)]
    pub children: Vec<TraceTree>,
}

impl TraceTree {
    /// Create a leaf.
    pub fn leaf(kind: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source_path: source_path.into(),
            inputs: Value::Null,
            output: Value::Null,
            children: Vec::new(),
        }
    }

    /// Attach inputs.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Attach output.
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Append a child.
    pub fn push(&mut self, child: TraceTree) {
        self.children.push(child);
    }
}

/// One flattened trace node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceNode {
    pub id: String,
    pub kind: String,
    pub source_path: String,
    pub inputs: Value,
    pub output: Value,
    pub children: Vec<String>,
    pub timestamp: i64,
}

/// Flattened trace of a compute pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceGraph {
    /// Id of the root node.
    pub root: String,

    pub nodes: HashMap<String, TraceNode>,

    pub intent_id: String,

    pub action_id: String,

    pub base_version: u64,

    pub result_version: u64,

    pub terminated_by: ComputeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Identity of the pass a trace belongs to.
#[derive(Debug, Clone)]
pub struct TraceHeader {
    pub intent_id: String,
    pub action_id: String,
    pub base_version: u64,
    pub result_version: u64,
    pub terminated_by: ComputeStatus,
    pub timestamp: i64,
    pub duration_ms: Option<u64>,
}

impl TraceGraph {
    /// Flatten a nested tree. Ids are source paths, suffixed on collision.
    pub fn from_tree(tree: TraceTree, header: TraceHeader) -> Self {
        let mut nodes = HashMap::new();
        let root = flatten(tree, header.timestamp, &mut nodes);
        Self {
            root,
            nodes,
            intent_id: header.intent_id,
            action_id: header.action_id,
            base_version: header.base_version,
            result_version: header.result_version,
            terminated_by: header.terminated_by,
            duration_ms: header.duration_ms,
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&TraceNode> {
        self.nodes.get(id)
    }

    /// Root node.
    pub fn root_node(&self) -> Option<&TraceNode> {
        self.nodes.get(&self.root)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order-independent digest, equal for equal traces. Used to compare replays.
    pub fn digest(&self) -> String {
        let ordered: BTreeMap<&String, &TraceNode> = self.nodes.iter().collect();
        let body = serde_json::json!({
            "root": self.root,
            "nodes": ordered,
            "intentId": self.intent_id,
            "actionId": self.action_id,
            "baseVersion": self.base_version,
            "resultVersion": self.result_version,
            "terminatedBy": self.terminated_by,
        });
        sha256_hex(body.to_string())
    }
}

fn flatten(tree: TraceTree, timestamp: i64, nodes: &mut HashMap<String, TraceNode>) -> String {
    let mut id = tree.source_path.clone();
    let mut suffix = 1;
    while nodes.contains_key(&id) {
        id = format!("{}#{}", tree.source_path, suffix);
        suffix += 1;
    }
    // Reserve the id before descending so children cannot claim it.
    nodes.insert(
        id.clone(),
        TraceNode {
            id: id.clone(),
            kind: tree.kind,
            source_path: tree.source_path,
            inputs: tree.inputs,
            output: tree.output,
            children: Vec::new(),
            timestamp,
        },
    );

    let children: Vec<String> = tree
        .children
        .into_iter()
        .map(|child| flatten(child, timestamp, nodes))
        .collect();
    if let Some(node) = nodes.get_mut(&id) {
        node.children = children;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> TraceHeader {
        TraceHeader {
            intent_id: "i-1".to_string(),
            action_id: "load".to_string(),
            base_version: 1,
            result_version: 2,
            terminated_by: ComputeStatus::Complete,
            timestamp: 10,
            duration_ms: None,
        }
    }

    #[test]
    fn test_flatten_tree() {
        let mut root = TraceTree::leaf("seq", "root");
        root.push(TraceTree::leaf("patch", "root.steps.0"));
        root.push(TraceTree::leaf("halt", "root.steps.1"));

        let graph = TraceGraph::from_tree(root, header());
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.root, "root");
        assert_eq!(
            graph.root_node().unwrap().children,
            vec!["root.steps.0".to_string(), "root.steps.1".to_string()]
        );
        assert_eq!(graph.node("root.steps.1").unwrap().kind, "halt");
    }

    #[test]
    fn test_duplicate_ids_are_suffixed() {
        let mut root = TraceTree::leaf("flow", "root");
        root.push(TraceTree::leaf("seq", "root"));

        let graph = TraceGraph::from_tree(root, header());
        assert_eq!(graph.len(), 2);
        assert!(graph.node("root#1").is_some());
    }

    #[test]
    fn test_digest_is_stable() {
        let mut a = TraceTree::leaf("seq", "root");
        a.push(TraceTree::leaf("patch", "root.steps.0"));
        let b = a.clone();

        let ga = TraceGraph::from_tree(a, header());
        let gb = TraceGraph::from_tree(b, header());
        assert_eq!(ga.digest(), gb.digest());
    }
}
