//! Structured trace event stream.
//!
//! Separate from logging: these events are the compliance record of what the
//! scheduler did, in order. They go to every registered [`TraceSink`] and to a
//! broadcast channel for live subscribers.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strata_core::ComputeStatus;
use tokio::sync::broadcast;
use tracing::trace;

use crate::job::{JobKind, JobOutcome};

/// One scheduler event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    #[serde(rename = "runner:kick", rename_all = "camelCase")]
    RunnerKick { key: String },

    #[serde(rename = "job:start", rename_all = "camelCase")]
    JobStart {
        key: String,
        job_id: u64,
        job: JobKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent_id: Option<String>,
    },

    #[serde(rename = "job:end", rename_all = "camelCase")]
    JobEnd {
        key: String,
        job_id: u64,
        job: JobKind,
        outcome: JobOutcome,
    },

    #[serde(rename = "core:compute", rename_all = "camelCase")]
    CoreCompute {
        key: String,
        intent_id: String,
        status: ComputeStatus,
        version: u64,
    },

    #[serde(rename = "core:apply", rename_all = "camelCase")]
    CoreApply {
        key: String,
        patch_count: usize,
        version: u64,
    },

    #[serde(rename = "effect:dispatch", rename_all = "camelCase")]
    EffectDispatch {
        key: String,
        intent_id: String,
        requirement_id: String,
        effect_type: String,
    },

    #[serde(rename = "continue:enqueue", rename_all = "camelCase")]
    ContinueEnqueue {
        key: String,
        intent_id: String,
        node_path: String,
    },

    #[serde(rename = "context:frozen", rename_all = "camelCase")]
    ContextFrozen {
        key: String,
        job_id: u64,
        now: i64,
        random_seed: String,
    },
}

impl TraceEvent {
    /// Wire name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::RunnerKick { .. } => "runner:kick",
            TraceEvent::JobStart { .. } => "job:start",
            TraceEvent::JobEnd { .. } => "job:end",
            TraceEvent::CoreCompute { .. } => "core:compute",
            TraceEvent::CoreApply { .. } => "core:apply",
            TraceEvent::EffectDispatch { .. } => "effect:dispatch",
            TraceEvent::ContinueEnqueue { .. } => "continue:enqueue",
            TraceEvent::ContextFrozen { .. } => "context:frozen",
        }
    }

    /// Execution key the event belongs to.
    pub fn key(&self) -> &str {
        match self {
            TraceEvent::RunnerKick { key }
            | TraceEvent::JobStart { key, .. }
            | TraceEvent::JobEnd { key, .. }
            | TraceEvent::CoreCompute { key, .. }
            | TraceEvent::CoreApply { key, .. }
            | TraceEvent::EffectDispatch { key, .. }
            | TraceEvent::ContinueEnqueue { key, .. }
            | TraceEvent::ContextFrozen { key, .. } => key,
        }
    }
}

/// Receives every trace event synchronously, in emission order per key.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events for one key.
    pub fn events_for(&self, key: &str) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.key() == key)
            .collect()
    }

    /// Event names for one key, in order.
    pub fn names_for(&self, key: &str) -> Vec<&'static str> {
        self.events_for(key).iter().map(TraceEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl TraceSink for RecordingTraceSink {
    fn record(&self, event: &TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fan-out to sinks and the broadcast channel.
pub struct TraceBus {
    sender: broadcast::Sender<TraceEvent>,
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl TraceBus {
    pub fn new(capacity: usize, sinks: Vec<Arc<dyn TraceSink>>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, sinks }
    }

    pub fn emit(&self, event: TraceEvent) {
        trace!(event = event.name(), key = event.key(), "trace event");
        for sink in &self.sinks {
            sink.record(&event);
        }
        // No live subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.sender.subscribe()
    }
}
