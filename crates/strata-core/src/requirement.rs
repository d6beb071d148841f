//! Effect requirements emitted by flow evaluation.

use serde::{Deserialize, Serialize};

use crate::hash::digest_parts;

/// Where in a flow a requirement suspended evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPosition {
    /// Dotted node path of the effect node (e.g. `root.steps.1`).
    pub node_path: String,

    /// Snapshot version the flow was evaluated against.
    pub snapshot_version: u64,
}

/// A pending effect request. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    /// Deterministic id derived from intent, node path and version.
    pub id: String,

    /// Effect type used to look up a handler.
    #[serde(rename = "type")]
    pub effect_type: String,

    /// Parameters, already evaluated against the patched working snapshot.
    #[serde(default)]
    pub params: serde_json::Value,

    /// Action whose flow emitted this requirement.
    pub action_id: String,

    /// Intent being processed when the requirement was emitted.
    pub intent_id: String,

    /// Resume point for the continuation.
    pub flow_position: FlowPosition,

    /// Host timestamp (epoch ms) at emission.
    pub created_at: i64,
}

impl Requirement {
    /// Deterministic requirement id: same intent, node and version always give the same id.
    pub fn derive_id(intent_id: &str, node_path: &str, snapshot_version: u64) -> String {
        let version = snapshot_version.to_string();
        let digest = digest_parts([intent_id, node_path, version.as_str()]);
        format!("req-{}", &digest[..16])
    }
}
