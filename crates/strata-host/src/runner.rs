//! Runner: drains one key's mailbox, one job at a time.
//!
//! A job holds the key's context for its whole compute/apply step and
//! replaces the head once. Effects are dispatched only after that commit, so a
//! handler always sees the state its flow had already patched.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use strata_compute::ComputeResult;
use strata_core::{ComputeStatus, HostContext, Intent, Patch, Result, Snapshot, StrataError};
use strata_effects::{EffectError, EffectResult};
use tracing::{debug, error, warn};

use crate::context::ExecutionContext;
use crate::dispatch::{EffectCompletion, EffectRequest};
use crate::hook::HookContext;
use crate::host::{HostInner, KeyState};
use crate::job::{Job, JobKind, JobOutcome};
use crate::trace::TraceEvent;

/// What one job produced, gathered while the context is locked and acted on
/// after it is released.
struct Step {
    outcome: JobOutcome,
    committed: Option<Arc<Snapshot>>,
    intent: Option<Intent>,
    proposal_id: Option<String>,
    status: Option<ComputeStatus>,
    dispatches: Vec<EffectRequest>,
}

impl Step {
    fn uncommitted(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            committed: None,
            intent: None,
            proposal_id: None,
            status: None,
            dispatches: Vec::new(),
        }
    }

    fn committed(outcome: JobOutcome, head: Arc<Snapshot>) -> Self {
        Self {
            committed: Some(head),
            ..Self::uncommitted(outcome)
        }
    }
}

pub(crate) struct Runner {
    inner: Arc<HostInner>,
    state: Arc<KeyState>,
}

impl Runner {
    pub(crate) fn new(inner: Arc<HostInner>, state: Arc<KeyState>) -> Self {
        Self { inner, state }
    }

    pub(crate) fn key(&self) -> &str {
        self.state.key()
    }

    /// One runner pass: process jobs until the mailbox goes idle.
    pub(crate) async fn run(self) {
        self.emit(TraceEvent::RunnerKick {
            key: self.key().to_string(),
        });
        while let Some(job) = self.state.mailbox.next() {
            self.process(job).await;
        }
        debug!(key = %self.key(), "runner idle");
        self.state.notify_if_quiescent();
    }

    async fn process(&self, job: Job) {
        let kind = job.kind();
        let key = self.key().to_string();

        let mut ctx = self.state.context.write().await;
        let job_id = ctx.next_job_id();
        self.emit(TraceEvent::JobStart {
            key: key.clone(),
            job_id,
            job: kind,
            intent_id: job.intent_id().map(str::to_string),
        });

        let host = self.inner.host_context.freeze(&key, job_id, job.intent_id());
        self.emit(TraceEvent::ContextFrozen {
            key: key.clone(),
            job_id,
            now: host.now,
            random_seed: host.random_seed.clone(),
        });

        let step = match job {
            Job::StartIntent {
                intent,
                proposal_id,
            } => self.start_intent(&mut ctx, &host, intent, proposal_id),
            Job::ContinueCompute {
                intent_id,
                node_path,
            } => self.continue_compute(&mut ctx, &host, &intent_id, &node_path),
            Job::FulfillEffect {
                intent_id,
                requirement_id,
                result,
            } => self.fulfill_effect(&mut ctx, &host, &intent_id, &requirement_id, result),
            Job::ApplyPatches { patches } => self.apply_patches(&mut ctx, &host, &patches),
        };
        drop(ctx);

        for request in step.dispatches.iter().cloned() {
            self.dispatch_effect(request);
        }

        if let Some(head) = &step.committed {
            self.run_hooks(&step, kind, head);
        }

        // Hooks have opened whatever this job spawned, so settling it last
        // keeps a still-running chain tracked.
        if let (Some(status), Some(proposal_id)) = (step.status, &step.proposal_id) {
            if status.is_terminal() && self.state.liveness().settle(proposal_id) {
                debug!(key = %key, proposal_id = %proposal_id, "proposal settled");
            }
        }

        self.emit(TraceEvent::JobEnd {
            key,
            job_id,
            job: kind,
            outcome: step.outcome,
        });
    }

    fn start_intent(
        &self,
        ctx: &mut ExecutionContext,
        host: &HostContext,
        intent: Intent,
        proposal_id: Option<String>,
    ) -> Step {
        let proposal_id = proposal_id.unwrap_or_else(|| {
            self.open_chain(&intent.intent_id);
            intent.intent_id.clone()
        });
        match self.inner.engine.compute(&self.inner.schema, ctx.head(), &intent, host) {
            Ok(result) => self.commit_compute(ctx, intent, proposal_id, result),
            Err(err) => Step {
                proposal_id: Some(proposal_id),
                status: Some(ComputeStatus::Error),
                ..self.fatal(Some(&intent.intent_id), &err)
            },
        }
    }

    fn continue_compute(
        &self,
        ctx: &mut ExecutionContext,
        host: &HostContext,
        intent_id: &str,
        node_path: &str,
    ) -> Step {
        let Some(active) = ctx.active(intent_id).cloned() else {
            let err = StrataError::UnknownIntent {
                key: self.key().to_string(),
                intent_id: intent_id.to_string(),
            };
            return self.fatal(Some(intent_id), &err);
        };
        match self
            .inner
            .engine
            .resume(&self.inner.schema, ctx.head(), &active.intent, node_path, host)
        {
            Ok(result) => self.commit_compute(ctx, active.intent, active.proposal_id, result),
            Err(err) => {
                ctx.finish(intent_id);
                Step {
                    proposal_id: Some(active.proposal_id),
                    status: Some(ComputeStatus::Error),
                    ..self.fatal(Some(intent_id), &err)
                }
            }
        }
    }

    fn commit_compute(
        &self,
        ctx: &mut ExecutionContext,
        intent: Intent,
        proposal_id: String,
        result: ComputeResult,
    ) -> Step {
        let key = self.key().to_string();
        let version = result.snapshot.meta.version;
        let status = result.status;
        self.emit(TraceEvent::CoreCompute {
            key: key.clone(),
            intent_id: intent.intent_id.clone(),
            status,
            version,
        });

        if let Some(err) = result.error() {
            debug!(key = %key, intent_id = %intent.intent_id, error = %err, "intent ended in error");
        }

        let patch_count = result.patches.len();
        let head = ctx.commit(result.snapshot);
        self.emit(TraceEvent::CoreApply {
            key: key.clone(),
            patch_count,
            version,
        });

        if status == ComputeStatus::Pending {
            ctx.track(intent.clone(), proposal_id.clone());
        } else {
            ctx.finish(&intent.intent_id);
        }
        let dispatches = result
            .requirements
            .into_iter()
            .map(|requirement| EffectRequest::new(&key, &intent, requirement, head.clone()))
            .collect();

        Step {
            outcome: status.into(),
            committed: Some(head),
            intent: Some(intent),
            proposal_id: Some(proposal_id),
            status: Some(status),
            dispatches,
        }
    }

    fn fulfill_effect(
        &self,
        ctx: &mut ExecutionContext,
        host: &HostContext,
        intent_id: &str,
        requirement_id: &str,
        result: EffectResult,
    ) -> Step {
        let key = self.key().to_string();
        let mut base = Snapshot::clone(ctx.head());
        let Some(requirement) = base.take_requirement(requirement_id) else {
            warn!(key = %key, intent_id, requirement = requirement_id, "completion for a requirement that is no longer pending");
            return Step::uncommitted(JobOutcome::Stale);
        };
        let active = ctx.active(intent_id).cloned();
        let engine = &self.inner.engine;

        if result.success {
            let report = engine.apply_report(&self.inner.schema, &base, &result.patches, host);
            let version = report.snapshot.meta.version;
            let head = ctx.commit(report.snapshot);
            self.emit(TraceEvent::CoreApply {
                key: key.clone(),
                patch_count: report.applied,
                version,
            });

            if report.error.is_none() {
                let node_path = requirement.flow_position.node_path;
                self.enqueue(Job::ContinueCompute {
                    intent_id: intent_id.to_string(),
                    node_path: node_path.clone(),
                });
                self.emit(TraceEvent::ContinueEnqueue {
                    key,
                    intent_id: intent_id.to_string(),
                    node_path,
                });
                return Step {
                    intent: active.as_ref().map(|a| a.intent.clone()),
                    proposal_id: active.map(|a| a.proposal_id),
                    ..Step::committed(JobOutcome::Applied, head)
                };
            }

            ctx.finish(intent_id);
            return Step {
                intent: active.as_ref().map(|a| a.intent.clone()),
                proposal_id: active.map(|a| a.proposal_id),
                status: Some(ComputeStatus::Error),
                ..Step::committed(JobOutcome::Error, head)
            };
        }

        let effect_error = result.error.unwrap_or_else(|| EffectError::Handler {
            effect_type: requirement.effect_type.clone(),
            message: "effect reported failure without an error".to_string(),
        });
        warn!(key = %key, intent_id, requirement = requirement_id, error = %effect_error, "effect failed, intent stopped");
        let failed = engine.record_failure(&base, effect_error.to_error_value(&requirement, host.now), host);
        let version = failed.meta.version;
        let head = ctx.commit(failed);
        self.emit(TraceEvent::CoreApply {
            key,
            patch_count: 0,
            version,
        });
        ctx.finish(intent_id);

        Step {
            intent: active.as_ref().map(|a| a.intent.clone()),
            proposal_id: active.map(|a| a.proposal_id),
            status: Some(ComputeStatus::Error),
            ..Step::committed(JobOutcome::Error, head)
        }
    }

    fn apply_patches(&self, ctx: &mut ExecutionContext, host: &HostContext, patches: &[Patch]) -> Step {
        let report = self
            .inner
            .engine
            .apply_report(&self.inner.schema, ctx.head(), patches, host);
        let version = report.snapshot.meta.version;
        let failed = report.error.is_some();
        let head = ctx.commit(report.snapshot);
        self.emit(TraceEvent::CoreApply {
            key: self.key().to_string(),
            patch_count: report.applied,
            version,
        });
        let outcome = if failed { JobOutcome::Error } else { JobOutcome::Applied };
        Step::committed(outcome, head)
    }

    fn dispatch_effect(&self, request: EffectRequest) {
        self.emit(TraceEvent::EffectDispatch {
            key: request.key.clone(),
            intent_id: request.intent_id.clone(),
            requirement_id: request.requirement_id.clone(),
            effect_type: request.effect_type.clone(),
        });
        self.state.effect_started();
        let completion = EffectCompletion::new(Arc::downgrade(&self.inner), self.state.clone(), &request);
        self.inner.dispatcher.dispatch(request, completion);
    }

    fn run_hooks(&self, step: &Step, kind: JobKind, head: &Arc<Snapshot>) {
        if self.inner.hooks.is_empty() {
            return;
        }
        let ctx = HookContext {
            runner: self,
            snapshot: head,
            job: kind,
            intent: step.intent.as_ref(),
            status: step.status,
            proposal_id: step.proposal_id.as_deref(),
        };
        for hook in &self.inner.hooks {
            let called = std::panic::catch_unwind(AssertUnwindSafe(|| hook.on_commit(&ctx)));
            if called.is_err() {
                let err = StrataError::Internal("hook panicked".to_string());
                self.inner
                    .fatal
                    .report(self.key(), step.intent.as_ref().map(|i| i.intent_id.as_str()), &err);
            }
        }
    }

    /// Count a hook re-injection. The first violation for a proposal goes to
    /// the fatal sink; every violation is returned to the hook.
    pub(crate) fn record_reinjection(&self, proposal_id: &str, intent: &Intent) -> Result<()> {
        let mut guard = self.state.liveness();
        let Err(err) = guard.record(proposal_id) else {
            return Ok(());
        };
        let first = guard.mark_tripped(proposal_id);
        drop(guard);
        if first {
            error!(key = %self.key(), proposal_id, error = %err, "liveness ceiling exceeded");
            self.inner.fatal.report(self.key(), Some(&intent.intent_id), &err);
        }
        Err(err)
    }

    /// Track one more queued intent of a proposal.
    pub(crate) fn open_chain(&self, proposal_id: &str) {
        self.state.liveness().open(proposal_id);
    }

    /// Queue a job on this runner's key. The mailbox is draining, so this
    /// never starts a second pass.
    pub(crate) fn enqueue(&self, job: Job) {
        self.inner.enqueue(&self.state, job);
    }

    fn fatal(&self, intent_id: Option<&str>, err: &StrataError) -> Step {
        error!(key = %self.key(), intent_id = intent_id.unwrap_or("-"), error = %err, "job aborted");
        self.inner.fatal.report(self.key(), intent_id, err);
        Step::uncommitted(JobOutcome::Fatal)
    }

    fn emit(&self, event: TraceEvent) {
        self.inner.trace.emit(event);
    }
}
