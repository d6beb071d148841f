//! Effect dispatch: handing pending requirements to whoever runs them, and
//! routing the outcome back into the key's mailbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::AbortHandle;
use serde_json::Value;
use strata_core::{Intent, Requirement, Snapshot};
use strata_effects::{EffectError, EffectExecutor, EffectResult};
use tracing::{debug, warn};

use crate::host::{HostInner, KeyState};
use crate::job::Job;

/// Everything a dispatch sink needs to run one requirement.
#[derive(Debug, Clone)]
pub struct EffectRequest {
    pub key: String,
    pub intent_id: String,
    pub requirement_id: String,
    pub effect_type: String,
    /// Parameters, already evaluated against the patched state.
    pub params: Value,
    pub intent: Intent,
    pub requirement: Requirement,
    /// Head committed by the job that emitted the requirement.
    pub snapshot: Arc<Snapshot>,
}

impl EffectRequest {
    pub(crate) fn new(key: &str, intent: &Intent, requirement: Requirement, snapshot: Arc<Snapshot>) -> Self {
        Self {
            key: key.to_string(),
            intent_id: requirement.intent_id.clone(),
            requirement_id: requirement.id.clone(),
            effect_type: requirement.effect_type.clone(),
            params: requirement.params.clone(),
            intent: intent.clone(),
            requirement,
            snapshot,
        }
    }
}

/// Runs requirements outside the mailbox.
///
/// Implementations must eventually call [`EffectCompletion::complete`] or drop
/// the completion; dropping it reports the effect as cancelled.
pub trait EffectDispatchSink: Send + Sync {
    fn dispatch(&self, request: EffectRequest, completion: EffectCompletion);
}

/// One-shot handle that feeds an effect's outcome back as a `FulfillEffect` job.
pub struct EffectCompletion {
    inner: Weak<HostInner>,
    state: Arc<KeyState>,
    intent_id: String,
    requirement_id: String,
    effect_type: String,
    done: bool,
}

impl EffectCompletion {
    pub(crate) fn new(inner: Weak<HostInner>, state: Arc<KeyState>, request: &EffectRequest) -> Self {
        Self {
            inner,
            state,
            intent_id: request.intent_id.clone(),
            requirement_id: request.requirement_id.clone(),
            effect_type: request.effect_type.clone(),
            done: false,
        }
    }

    pub fn requirement_id(&self) -> &str {
        &self.requirement_id
    }

    /// Report the outcome.
    pub fn complete(mut self, result: EffectResult) {
        self.finish(result);
    }

    fn finish(&mut self, result: EffectResult) {
        if self.done {
            return;
        }
        self.done = true;

        let job = Job::FulfillEffect {
            intent_id: self.intent_id.clone(),
            requirement_id: self.requirement_id.clone(),
            result,
        };
        // Enqueue before settling so the key never looks quiescent in between.
        match self.inner.upgrade() {
            Some(inner) => inner.enqueue(&self.state, job),
            None => debug!(requirement = %self.requirement_id, "host gone, effect completion discarded"),
        }
        self.state.effect_settled();
    }
}

impl Drop for EffectCompletion {
    fn drop(&mut self) {
        if !self.done {
            let error = EffectError::Cancelled {
                effect_type: self.effect_type.clone(),
            };
            self.finish(EffectResult::failed(error, 0));
        }
    }
}

impl std::fmt::Debug for EffectCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectCompletion")
            .field("intent_id", &self.intent_id)
            .field("requirement_id", &self.requirement_id)
            .field("done", &self.done)
            .finish()
    }
}

/// Default sink: runs each requirement on the tokio runtime through an
/// [`EffectExecutor`] and supports cancellation by requirement id.
#[derive(Debug, Clone)]
pub struct ExecutorDispatcher {
    executor: EffectExecutor,
    aborts: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl ExecutorDispatcher {
    pub fn new(executor: EffectExecutor) -> Self {
        Self {
            executor,
            aborts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn executor(&self) -> &EffectExecutor {
        &self.executor
    }

    fn aborts(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.aborts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort a running effect. Returns false if it is not running.
    pub fn cancel(&self, requirement_id: &str) -> bool {
        match self.aborts().remove(requirement_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Effects currently running.
    pub fn running(&self) -> usize {
        self.aborts().len()
    }
}

impl EffectDispatchSink for ExecutorDispatcher {
    fn dispatch(&self, request: EffectRequest, completion: EffectCompletion) {
        let (handle, registration) = EffectExecutor::abort_pair();
        self.aborts().insert(request.requirement_id.clone(), handle);

        let executor = self.executor.clone();
        let aborts = self.aborts.clone();
        tokio::spawn(async move {
            let result = executor
                .execute_abortable(&request.requirement, request.snapshot.clone(), registration)
                .await;
            aborts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request.requirement_id);
            if !result.success {
                warn!(
                    key = %request.key,
                    effect_type = %request.effect_type,
                    requirement = %request.requirement_id,
                    attempts = result.attempts,
                    "effect failed"
                );
            }
            completion.complete(result);
        });
    }
}
