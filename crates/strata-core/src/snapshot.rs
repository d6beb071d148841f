//! Snapshots: the complete, versioned state of one domain instance.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorValue;
use crate::host_context::HostContext;
use crate::requirement::Requirement;
use crate::types::SystemStatus;

/// Host-owned bookkeeping carried on every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub status: SystemStatus,

    #[serde(default)]
    pub last_error: Option<ErrorValue>,

    /// Every error recorded, oldest first.
    #[serde(default)]
    pub errors: Vec<ErrorValue>,

    /// Requirements awaiting effect fulfilment.
    #[serde(default)]
    pub pending_requirements: Vec<Requirement>,

    /// Action most recently started against this snapshot.
    #[serde(default)]
    pub current_action: Option<String>,
}

/// Version and provenance metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// Strictly increases on every committed mutation.
    pub version: u64,

    /// Host timestamp (epoch ms) of the last mutation.
    pub timestamp: i64,

    /// Random seed of the last mutation's host context.
    pub random_seed: String,

    /// Hash of the schema this snapshot was produced under.
    pub schema_hash: String,
}

/// The complete state of a domain instance at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Schema-typed domain state.
    pub data: Value,

    /// Derived values, consistent with `data` after every successful compute.
    #[serde(default)]
    pub computed: Map<String, Value>,

    pub system: SystemState,

    pub meta: SnapshotMeta,

    /// Input of the intent currently being processed.
    #[serde(default)]
    pub input: Value,
}

impl Snapshot {
    /// Create a version-0 snapshot with the given data.
    pub fn new(data: Value, schema_hash: impl Into<String>) -> Self {
        Self {
            data,
            computed: Map::new(),
            system: SystemState::default(),
            meta: SnapshotMeta {
                schema_hash: schema_hash.into(),
                ..SnapshotMeta::default()
            },
            input: Value::Null,
        }
    }

    /// Record a business error: sets `lastError`, appends to `errors`, status becomes `error`.
    pub fn record_error(&mut self, error: ErrorValue) {
        self.system.status = SystemStatus::Error;
        self.system.errors.push(error.clone());
        self.system.last_error = Some(error);
    }

    /// Advance the version exactly once and stamp time and seed from the host context.
    pub fn advance(&mut self, host: &HostContext) {
        self.meta.version += 1;
        self.meta.timestamp = host.now;
        self.meta.random_seed = host.random_seed.clone();
    }

    /// Remove and return a pending requirement.
    pub fn take_requirement(&mut self, requirement_id: &str) -> Option<Requirement> {
        let index = self
            .system
            .pending_requirements
            .iter()
            .position(|r| r.id == requirement_id)?;
        Some(self.system.pending_requirements.remove(index))
    }
}
