//! Frozen per-job host context.

use serde::{Deserialize, Serialize};

/// Time and randomness supplied by the host, captured once per job.
///
/// Every sub-step of a job reuses the same value, so two evaluations within one
/// job never observe different clocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    /// Epoch milliseconds.
    pub now: i64,

    pub random_seed: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl HostContext {
    /// Create a context without a duration.
    pub fn new(now: i64, random_seed: impl Into<String>) -> Self {
        Self {
            now,
            random_seed: random_seed.into(),
            duration_ms: None,
        }
    }

    /// Attach a measured duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
