//! Host context providers: where a job's frozen clock and seed come from.

use chrono::Utc;
use strata_core::hash::sha256_hex;
use strata_core::HostContext;

/// Supplies the [`HostContext`] frozen once at the start of each job.
pub trait HostContextProvider: Send + Sync {
    fn freeze(&self, key: &str, job_id: u64, intent_id: Option<&str>) -> HostContext;
}

/// Wall clock from `chrono`; seed derived from the intent and job.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostContext;

impl HostContextProvider for SystemHostContext {
    fn freeze(&self, key: &str, job_id: u64, intent_id: Option<&str>) -> HostContext {
        let origin = intent_id.unwrap_or(key);
        let seed = sha256_hex(format!("{}|{}", origin, job_id));
        HostContext::new(Utc::now().timestamp_millis(), seed)
    }
}

/// Constant clock, seed equal to the intent id. Makes whole runs replayable.
#[derive(Debug, Clone, Copy)]
pub struct FixedHostContext {
    now: i64,
}

impl FixedHostContext {
    pub fn new(now: i64) -> Self {
        Self { now }
    }
}

impl Default for FixedHostContext {
    fn default() -> Self {
        Self::new(0)
    }
}

impl HostContextProvider for FixedHostContext {
    fn freeze(&self, key: &str, job_id: u64, intent_id: Option<&str>) -> HostContext {
        let seed = match intent_id {
            Some(id) => id.to_string(),
            None => format!("{}#{}", key, job_id),
        };
        HostContext::new(self.now, seed)
    }
}
