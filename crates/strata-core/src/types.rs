//! Status enums shared across the Strata crates.

use serde::{Deserialize, Serialize};

/// `system.status` of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A compute pass is running against this snapshot.
    Computing,
    /// Waiting on one or more effect completions.
    Pending,
    /// The last action or patch batch failed.
    Error,
}

/// Terminal status of one compute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeStatus {
    /// The flow ran to its end.
    Complete,
    /// The flow suspended at an effect node.
    Pending,
    /// The flow reached a `halt` node.
    Halted,
    /// Validation or evaluation failed.
    Error,
}

impl ComputeStatus {
    /// Returns true if no continuation will follow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ComputeStatus::Pending)
    }

    /// The `system.status` a snapshot carries after a pass with this status.
    pub fn system_status(&self) -> SystemStatus {
        match self {
            ComputeStatus::Complete | ComputeStatus::Halted => SystemStatus::Idle,
            ComputeStatus::Pending => SystemStatus::Pending,
            ComputeStatus::Error => SystemStatus::Error,
        }
    }
}

/// Status threaded through flow evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    Running,
    Complete,
    Pending,
    Halted,
    Error,
}

impl FlowStatus {
    /// Returns true once evaluation must stop visiting nodes.
    pub fn is_stopped(&self) -> bool {
        matches!(self, FlowStatus::Pending | FlowStatus::Halted | FlowStatus::Error)
    }
}

impl From<FlowStatus> for ComputeStatus {
    fn from(status: FlowStatus) -> Self {
        match status {
            FlowStatus::Running | FlowStatus::Complete => ComputeStatus::Complete,
            FlowStatus::Pending => ComputeStatus::Pending,
            FlowStatus::Halted => ComputeStatus::Halted,
            FlowStatus::Error => ComputeStatus::Error,
        }
    }
}
