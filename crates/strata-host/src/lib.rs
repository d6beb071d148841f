//! # Strata Host
//!
//! The effectful half of the runtime. Each execution key gets its own
//! [`Mailbox`](mailbox::Mailbox) and runner: jobs for a key run one at a time
//! in enqueue order, each replacing the key's head snapshot once. Effects run
//! outside the mailbox and report back as `FulfillEffect` jobs.
//!
//! ```ignore
//! let host = Host::builder(schema)
//!     .effect("api.fetch", handler_fn(fetch))
//!     .build()?;
//! host.dispatch("main", Intent::new("load", json!({"id": 1}), "i-1"))?;
//! host.drain("main").await;
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod fatal;
pub mod hook;
pub mod host;
pub mod host_context;
pub mod job;
pub mod liveness;
pub mod mailbox;
mod runner;
pub mod trace;

pub use config::HostConfig;
pub use context::{ActiveIntent, ExecutionContext};
pub use dispatch::{EffectCompletion, EffectDispatchSink, EffectRequest, ExecutorDispatcher};
pub use fatal::{FatalReport, FatalSink, RecordingFatalSink, TracingFatalSink};
pub use hook::{Hook, HookContext};
pub use host::{Host, HostBuilder};
pub use host_context::{FixedHostContext, HostContextProvider, SystemHostContext};
pub use job::{Job, JobKind, JobOutcome};
pub use liveness::LivenessGuard;
pub use mailbox::Mailbox;
pub use trace::{RecordingTraceSink, TraceBus, TraceEvent, TraceSink};
