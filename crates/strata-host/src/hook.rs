//! Reactive hooks.
//!
//! A hook observes every committed head and may react by dispatching new
//! intents. Those intents are queued on the same key behind the current job,
//! never run recursively, and each one counts against the liveness guard.

use strata_core::{ComputeStatus, Intent, Result, Snapshot};

use crate::job::{Job, JobKind};
use crate::liveness::LivenessGuard;
use crate::runner::Runner;

/// Called after every job that committed a new head.
pub trait Hook: Send + Sync {
    fn on_commit(&self, ctx: &HookContext<'_>);
}

impl<F> Hook for F
where
    F: Fn(&HookContext<'_>) + Send + Sync,
{
    fn on_commit(&self, ctx: &HookContext<'_>) {
        self(ctx)
    }
}

/// What a hook sees about the job that just committed.
pub struct HookContext<'a> {
    pub(crate) runner: &'a Runner,
    pub(crate) snapshot: &'a Snapshot,
    pub(crate) job: JobKind,
    pub(crate) intent: Option<&'a Intent>,
    pub(crate) status: Option<ComputeStatus>,
    pub(crate) proposal_id: Option<&'a str>,
}

impl<'a> HookContext<'a> {
    pub fn key(&self) -> &str {
        self.runner.key()
    }

    /// The head just committed.
    pub fn snapshot(&self) -> &Snapshot {
        self.snapshot
    }

    pub fn job(&self) -> JobKind {
        self.job
    }

    /// Intent the job ran, if it ran one.
    pub fn intent(&self) -> Option<&Intent> {
        self.intent
    }

    /// Compute status of the job, for jobs that ran a flow.
    pub fn status(&self) -> Option<ComputeStatus> {
        self.status
    }

    /// Root intent of the running chain.
    pub fn proposal_id(&self) -> Option<&str> {
        self.proposal_id
    }

    /// Queue a new intent on this key.
    ///
    /// Inside a chain, domain intents count against the liveness ceiling. Past
    /// the ceiling the intent is refused and the violation is returned.
    pub fn dispatch(&self, intent: Intent) -> Result<()> {
        intent.validate()?;
        if let Some(proposal_id) = self.proposal_id {
            if !LivenessGuard::is_exempt(&intent) {
                self.runner.record_reinjection(proposal_id, &intent)?;
            }
            self.runner.open_chain(proposal_id);
        }
        self.runner.enqueue(Job::StartIntent {
            intent,
            proposal_id: self.proposal_id.map(str::to_string),
        });
        Ok(())
    }
}
