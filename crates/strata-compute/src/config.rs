//! Compute engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the compute engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Flows nested deeper than this are rejected as malformed schemas.
    pub max_flow_depth: usize,

    /// Oldest entries of `system.errors` are dropped beyond this many.
    pub max_errors_retained: usize,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            max_flow_depth: 64,
            max_errors_retained: 100,
        }
    }
}

impl ComputeConfig {
    /// Set the maximum flow depth.
    pub fn with_max_flow_depth(mut self, depth: usize) -> Self {
        self.max_flow_depth = depth;
        self
    }

    /// Set how many errors a snapshot keeps.
    pub fn with_max_errors_retained(mut self, count: usize) -> Self {
        self.max_errors_retained = count;
        self
    }
}
