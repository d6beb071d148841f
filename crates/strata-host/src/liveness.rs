//! Liveness guard: circuit breaker against hook-driven action loops.

use std::collections::{HashMap, HashSet};

use strata_core::{Intent, StrataError};

/// Counts hook re-injections per proposal (root intent id).
///
/// A proposal stays tracked while any of its intents is queued or running.
/// Its counter is only forgotten once the last of them settles, so a short
/// sibling branch cannot reset the budget of a branch still looping.
#[derive(Debug, Clone)]
pub struct LivenessGuard {
    ceiling: u32,
    counts: HashMap<String, u32>,
    outstanding: HashMap<String, u32>,
    tripped: HashSet<String>,
}

impl LivenessGuard {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            counts: HashMap::new(),
            outstanding: HashMap::new(),
            tripped: HashSet::new(),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// System actions never count against a proposal.
    pub fn is_exempt(intent: &Intent) -> bool {
        intent.is_system()
    }

    /// Record one re-injection under `proposal_id`. Fails once the count
    /// exceeds the ceiling; a tripped proposal stays tripped until released.
    pub fn record(&mut self, proposal_id: &str) -> Result<u32, StrataError> {
        let count = self.counts.entry(proposal_id.to_string()).or_insert(0);
        if !self.tripped.contains(proposal_id) {
            *count += 1;
        }
        if *count > self.ceiling {
            return Err(StrataError::LivenessViolation {
                proposal_id: proposal_id.to_string(),
                count: *count,
                ceiling: self.ceiling,
            });
        }
        Ok(*count)
    }

    /// Mark a violation as reported. Returns true only the first time.
    pub fn mark_tripped(&mut self, proposal_id: &str) -> bool {
        self.tripped.insert(proposal_id.to_string())
    }

    /// Current count for a proposal.
    pub fn count(&self, proposal_id: &str) -> u32 {
        self.counts.get(proposal_id).copied().unwrap_or(0)
    }

    /// Note one more intent of the proposal queued or running.
    pub fn open(&mut self, proposal_id: &str) {
        *self.outstanding.entry(proposal_id.to_string()).or_insert(0) += 1;
    }

    /// Note one intent of the proposal settled. Returns true when that was the
    /// last one and the proposal has been released.
    pub fn settle(&mut self, proposal_id: &str) -> bool {
        let remaining = match self.outstanding.get_mut(proposal_id) {
            Some(open) => {
                *open = open.saturating_sub(1);
                *open
            }
            None => 0,
        };
        if remaining > 0 {
            return false;
        }
        self.release(proposal_id);
        true
    }

    /// Intents of the proposal still queued or running.
    pub fn outstanding(&self, proposal_id: &str) -> u32 {
        self.outstanding.get(proposal_id).copied().unwrap_or(0)
    }

    /// Forget a proposal whose chain has ended.
    pub fn release(&mut self, proposal_id: &str) {
        self.counts.remove(proposal_id);
        self.outstanding.remove(proposal_id);
        self.tripped.remove(proposal_id);
    }

    /// Proposals currently tracked.
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_past_ceiling() {
        let mut guard = LivenessGuard::new(3);
        for expected in 1..=3 {
            assert_eq!(guard.record("p").unwrap(), expected);
        }
        let err = guard.record("p").unwrap_err();
        assert_eq!(
            err,
            StrataError::LivenessViolation {
                proposal_id: "p".to_string(),
                count: 4,
                ceiling: 3
            }
        );
        assert!(guard.mark_tripped("p"));
        assert!(!guard.mark_tripped("p"));

        // Further attempts keep failing without inflating the count.
        assert!(guard.record("p").is_err());
        assert_eq!(guard.count("p"), 4);
    }

    #[test]
    fn test_release_resets() {
        let mut guard = LivenessGuard::new(1);
        guard.record("p").unwrap();
        assert!(guard.record("p").is_err());
        guard.mark_tripped("p");

        guard.release("p");
        assert_eq!(guard.count("p"), 0);
        assert_eq!(guard.tracked(), 0);
        assert!(guard.record("p").is_ok());
    }

    #[test]
    fn test_released_only_when_last_intent_settles() {
        let mut guard = LivenessGuard::new(5);
        guard.open("p");
        guard.record("p").unwrap();
        guard.open("p");
        guard.record("p").unwrap();
        guard.open("p");
        assert_eq!(guard.outstanding("p"), 3);

        assert!(!guard.settle("p"));
        assert!(!guard.settle("p"));
        assert_eq!(guard.count("p"), 2);

        assert!(guard.settle("p"));
        assert_eq!(guard.count("p"), 0);
        assert_eq!(guard.tracked(), 0);
    }

    #[test]
    fn test_settle_untracked_is_harmless() {
        let mut guard = LivenessGuard::new(1);
        assert!(guard.settle("ghost"));
        assert_eq!(guard.outstanding("ghost"), 0);
    }

    #[test]
    fn test_proposals_are_independent() {
        let mut guard = LivenessGuard::new(1);
        guard.record("a").unwrap();
        guard.record("b").unwrap();
        assert!(guard.record("a").is_err());
        assert_eq!(guard.count("b"), 1);
    }

    #[test]
    fn test_system_actions_exempt() {
        let intent = Intent::new("system.log", serde_json::json!({}), "i-1");
        assert!(LivenessGuard::is_exempt(&intent));
        let intent = Intent::new("addTodo", serde_json::json!({}), "i-2");
        assert!(!LivenessGuard::is_exempt(&intent));
    }
}
