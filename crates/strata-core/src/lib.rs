//! # Strata Core
//!
//! Core primitives and types for the Strata runtime.
//!
//! This crate provides the data model every other crate speaks:
//! - [`Snapshot`] - Complete, versioned state of a domain instance
//! - [`Intent`] - Request to run one domain action
//! - [`Patch`] - Atomic mutation instruction
//! - [`Requirement`] - Pending effect request
//! - [`DomainSchema`] - Field tree, computed fields and action flows
//! - [`ErrorValue`] / [`StrataError`] - Business errors vs contract violations

pub mod error;
pub mod expr;
pub mod flow;
pub mod hash;
pub mod host_context;
pub mod intent;
pub mod patch;
pub mod path;
pub mod requirement;
pub mod schema;
pub mod snapshot;
pub mod trace;
pub mod types;

// Re-exports for convenience
pub use error::{ErrorCode, ErrorSource, ErrorValue, Result, StrataError};
pub use expr::{EvalContext, Expr, ExprError};
pub use flow::{FlowNode, PatchOp};
pub use host_context::HostContext;
pub use intent::{Intent, IntentBuilder};
pub use patch::Patch;
pub use requirement::{FlowPosition, Requirement};
pub use schema::{ActionSpec, ComputedFieldSpec, DomainSchema, FieldResolution, FieldSpec, FieldType};
pub use snapshot::{Snapshot, SnapshotMeta, SystemState};
pub use trace::{TraceGraph, TraceNode, TraceTree};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{ErrorCode, ErrorValue, Result, StrataError};
    pub use crate::host_context::HostContext;
    pub use crate::intent::Intent;
    pub use crate::patch::Patch;
    pub use crate::requirement::Requirement;
    pub use crate::schema::DomainSchema;
    pub use crate::snapshot::Snapshot;
    pub use crate::types::{ComputeStatus, SystemStatus};
}
