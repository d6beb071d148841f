//! Error types for the Strata runtime.
//!
//! Two families live here:
//! - [`ErrorValue`] - business failures recorded inside a snapshot. These are
//!   values and never cross the compute boundary as `Err`.
//! - [`StrataError`] - contract violations and infrastructure faults that cannot
//!   be attributed to a schema-level error code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code attached to every value-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The schema or a value failed structural validation.
    ValidationError,
    /// Intent input does not match the action's declared input shape.
    InvalidInput,
    /// A value's runtime type disagrees with what was expected.
    TypeMismatch,
    /// The intent names an action the schema does not declare.
    UnknownAction,
    /// A patch targets a path the schema does not declare.
    PathNotFound,
    /// The action's availability guard evaluated to false.
    ActionUnavailable,
    /// Computed fields depend on each other in a cycle.
    CyclicDependency,
    /// An effect failed, timed out, or had no handler.
    EffectFailed,
    /// A flow terminated through an explicit `fail` node.
    FlowFailed,
    /// Anything else.
    InternalError,
}

impl ErrorCode {
    /// Wire name of the code (e.g. `TYPE_MISMATCH`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ErrorCode::ActionUnavailable => "ACTION_UNAVAILABLE",
            ErrorCode::CyclicDependency => "CYCLIC_DEPENDENCY",
            ErrorCode::EffectFailed => "EFFECT_FAILED",
            ErrorCode::FlowFailed => "FLOW_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error value originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSource {
    /// Action being processed, if any.
    pub action_id: Option<String>,

    /// Flow node path (e.g. `root.steps.2`), if any.
    pub node_path: Option<String>,
}

/// A business error recorded in `system.lastError` / `system.errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub message: String,
    pub source: ErrorSource,

    /// Host-supplied timestamp (epoch ms) of the step that produced the error.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorValue {
    /// Create an error value with an empty source.
    pub fn new(code: ErrorCode, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            code,
            message: message.into(),
            source: ErrorSource::default(),
            timestamp,
            context: None,
        }
    }

    /// Attach the action being processed.
    pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
        self.source.action_id = Some(action_id.into());
        self
    }

    /// Attach the flow node path.
    pub fn with_node_path(mut self, node_path: impl Into<String>) -> Self {
        self.source.node_path = Some(node_path.into());
        self
    }

    /// Attach structured diagnostic context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Contract violations and infrastructure faults.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrataError {
    /// An intent arrived without an id.
    #[error("Intent of type '{intent_type}' is missing an intentId")]
    MissingIntentId { intent_type: String },

    /// Intent could not be constructed.
    #[error("Intent invalid: {0}")]
    InvalidIntent(String),

    /// A reactive hook re-enqueued domain actions past the configured ceiling.
    #[error("Liveness violation: proposal {proposal_id} re-injected {count} actions (ceiling {ceiling})")]
    LivenessViolation {
        proposal_id: String,
        count: u32,
        ceiling: u32,
    },

    /// The schema cannot be used at all.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A snapshot cannot be installed as a head.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A job referenced an intent the execution context does not know.
    #[error("Intent {intent_id} is not tracked for key {key}")]
    UnknownIntent { key: String, intent_id: String },

    /// The host was assembled with conflicting or unusable settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Returns true for the runaway-loop circuit breaker.
    pub fn is_liveness_violation(&self) -> bool {
        matches!(self, StrataError::LivenessViolation { .. })
    }
}

/// Convenience Result type for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}
