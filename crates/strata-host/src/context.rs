//! Execution context: the canonical head snapshot of one key.

use std::collections::HashMap;
use std::sync::Arc;

use strata_compute::refresh_computed;
use strata_core::{DomainSchema, Intent, Snapshot};

/// An intent whose flow has started but not reached a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveIntent {
    pub intent: Intent,

    /// Root intent of the chain, used by the liveness guard.
    pub proposal_id: String,
}

/// Head snapshot and bookkeeping for one execution key.
///
/// Only the runner for the key writes here, one job at a time. The head is
/// replaced as a whole on commit, never edited in place.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    key: String,
    head: Arc<Snapshot>,
    active: HashMap<String, ActiveIntent>,
    last_job_id: u64,
}

impl ExecutionContext {
    /// Context for a key never seen before: defaults applied, computed derived.
    pub fn genesis(key: impl Into<String>, schema: &DomainSchema) -> Self {
        let mut snapshot = schema.genesis_snapshot();
        // A broken computed graph surfaces on the first compute, not here.
        let _ = refresh_computed(schema, &mut snapshot, 0);
        Self::with_head(key, snapshot)
    }

    /// Context starting from an existing snapshot.
    pub fn with_head(key: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            key: key.into(),
            head: Arc::new(snapshot),
            active: HashMap::new(),
            last_job_id: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current head.
    pub fn head(&self) -> &Arc<Snapshot> {
        &self.head
    }

    /// Replace the head.
    pub fn commit(&mut self, snapshot: Snapshot) -> Arc<Snapshot> {
        self.head = Arc::new(snapshot);
        self.head.clone()
    }

    /// Allocate the next job id. Ids start at 1 and never repeat within a key.
    pub fn next_job_id(&mut self) -> u64 {
        self.last_job_id += 1;
        self.last_job_id
    }

    pub fn track(&mut self, intent: Intent, proposal_id: impl Into<String>) {
        let proposal_id = proposal_id.into();
        self.active.insert(
            intent.intent_id.clone(),
            ActiveIntent {
                intent,
                proposal_id,
            },
        );
    }

    pub fn active(&self, intent_id: &str) -> Option<&ActiveIntent> {
        self.active.get(intent_id)
    }

    /// Stop tracking an intent.
    pub fn finish(&mut self, intent_id: &str) -> Option<ActiveIntent> {
        self.active.remove(intent_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
