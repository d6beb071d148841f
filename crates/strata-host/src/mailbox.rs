//! Per-key job queue.
//!
//! A mailbox is either idle (empty, no runner) or draining (a runner pass owns
//! it). The enqueue and the idle transition happen under the same lock, so a
//! job enqueued while the runner is finishing is either seen by that runner or
//! triggers a fresh kick. Nothing is lost in between.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::job::Job;

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<Job>,
    draining: bool,
}

/// FIFO queue of jobs for one execution key.
#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job. Returns true if the mailbox was idle and the caller must
    /// start a runner pass.
    pub fn enqueue(&self, job: Job) -> bool {
        let mut state = self.lock();
        state.queue.push_back(job);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Next job for the active runner. Returns `None` and marks the mailbox
    /// idle once the queue is empty.
    pub fn next(&self) -> Option<Job> {
        let mut state = self.lock();
        let job = state.queue.pop_front();
        if job.is_none() {
            state.draining = false;
        }
        job
    }

    /// Give up a claimed pass that could not be started.
    pub fn release(&self) {
        self.lock().draining = false;
    }

    /// Empty and not owned by a runner.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        !state.draining && state.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }
}
