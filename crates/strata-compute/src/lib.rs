//! # Strata Compute
//!
//! The pure half of the runtime. Given a schema, a snapshot, an intent and a
//! frozen host context, it produces the next snapshot candidate:
//!
//! - [`flow`] - flow evaluator threading a [`FlowState`] through the graph
//! - [`computed`] - dependency-ordered computed-field resolver
//! - [`apply`] - schema-checked patch applier
//! - [`compute`] - the engine tying them together
//!
//! Nothing here performs IO or reads a clock.

pub mod apply;
pub mod compute;
pub mod computed;
pub mod config;
pub mod flow;

pub use apply::{apply_patch, apply_patches, apply_patches_report, ApplyReport, PatchOutcome};
pub use compute::{apply, compute, ComputeEngine, ComputeResult};
pub use computed::{derive_computed, refresh_computed};
pub use config::ComputeConfig;
pub use flow::{FlowEvaluator, FlowState};
