//! Units of scheduler work.
//!
//! A job is consumed by exactly one runner step and then discarded; it is
//! never mutated in place.

use serde::{Deserialize, Serialize};
use strata_core::{ComputeStatus, Intent, Patch};
use strata_effects::EffectResult;

/// One unit of work for an execution key.
#[derive(Debug, Clone)]
pub enum Job {
    /// Run an intent's action from the current head.
    StartIntent {
        intent: Intent,
        /// Root intent of the chain this intent belongs to. `None` starts a new chain.
        proposal_id: Option<String>,
    },

    /// Resume a suspended flow at the recorded node path.
    ContinueCompute { intent_id: String, node_path: String },

    /// Apply an effect's outcome and clear its requirement.
    FulfillEffect {
        intent_id: String,
        requirement_id: String,
        result: EffectResult,
    },

    /// Apply patches directly, with no flow.
    ApplyPatches { patches: Vec<Patch> },
}

impl Job {
    /// Start a new chain with this intent.
    pub fn start(intent: Intent) -> Self {
        Job::StartIntent {
            intent,
            proposal_id: None,
        }
    }

    /// Direct patch submission.
    pub fn apply(patches: Vec<Patch>) -> Self {
        Job::ApplyPatches { patches }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::StartIntent { .. } => JobKind::StartIntent,
            Job::ContinueCompute { .. } => JobKind::ContinueCompute,
            Job::FulfillEffect { .. } => JobKind::FulfillEffect,
            Job::ApplyPatches { .. } => JobKind::ApplyPatches,
        }
    }

    /// Intent this job works on, if any.
    pub fn intent_id(&self) -> Option<&str> {
        match self {
            Job::StartIntent { intent, .. } => Some(&intent.intent_id),
            Job::ContinueCompute { intent_id, .. } | Job::FulfillEffect { intent_id, .. } => Some(intent_id),
            Job::ApplyPatches { .. } => None,
        }
    }
}

/// Job type tag carried on trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    StartIntent,
    ContinueCompute,
    FulfillEffect,
    ApplyPatches,
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Complete,
    Pending,
    Halted,
    Error,
    /// Patches committed; more work may follow.
    Applied,
    /// A completion for a requirement that was no longer pending.
    Stale,
    /// Reported to the fatal sink; the head was not replaced.
    Fatal,
}

impl From<ComputeStatus> for JobOutcome {
    fn from(status: ComputeStatus) -> Self {
        match status {
            ComputeStatus::Complete => JobOutcome::Complete,
            ComputeStatus::Pending => JobOutcome::Pending,
            ComputeStatus::Halted => JobOutcome::Halted,
            ComputeStatus::Error => JobOutcome::Error,
        }
    }
}
