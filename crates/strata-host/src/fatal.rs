//! Fatal-error sink: escalation path for failures that are not business errors.

use std::sync::{Mutex, PoisonError};

use strata_core::StrataError;
use tracing::error;

/// Receives contract violations and infrastructure faults.
pub trait FatalSink: Send + Sync {
    fn report(&self, key: &str, intent_id: Option<&str>, error: &StrataError);
}

/// Default sink: logs at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFatalSink;

impl FatalSink for TracingFatalSink {
    fn report(&self, key: &str, intent_id: Option<&str>, err: &StrataError) {
        error!(key, intent_id = intent_id.unwrap_or("-"), error = %err, "fatal error");
    }
}

/// One reported fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct FatalReport {
    pub key: String,
    pub intent_id: Option<String>,
    pub error: StrataError,
}

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingFatalSink {
    reports: Mutex<Vec<FatalReport>>,
}

impl RecordingFatalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FatalReport> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reports that are liveness violations.
    pub fn liveness_violations(&self) -> Vec<FatalReport> {
        self.reports()
            .into_iter()
            .filter(|r| r.error.is_liveness_violation())
            .collect()
    }
}

impl FatalSink for RecordingFatalSink {
    fn report(&self, key: &str, intent_id: Option<&str>, error: &StrataError) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FatalReport {
                key: key.to_string(),
                intent_id: intent_id.map(str::to_string),
                error: error.clone(),
            });
    }
}
