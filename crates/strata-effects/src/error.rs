//! Effect execution errors.

use serde_json::json;
use strata_core::{ErrorCode, ErrorValue, Requirement};
use thiserror::Error;

/// Why an effect did not produce patches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("effect '{effect_type}' timed out after {timeout_ms}ms")]
    Timeout { effect_type: String, timeout_ms: u64 },

    #[error("effect '{effect_type}' failed: {message}")]
    Handler { effect_type: String, message: String },

    #[error("no handler registered for effect '{effect_type}'")]
    MissingHandler { effect_type: String },

    #[error("effect '{effect_type}' was cancelled")]
    Cancelled { effect_type: String },

    #[error("a handler for effect '{effect_type}' is already registered")]
    DuplicateHandler { effect_type: String },
}

impl EffectError {
    /// Short kind name for logs and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            EffectError::Timeout { .. } => "timeout",
            EffectError::Handler { .. } => "handler",
            EffectError::MissingHandler { .. } => "missing_handler",
            EffectError::Cancelled { .. } => "cancelled",
            EffectError::DuplicateHandler { .. } => "duplicate_handler",
        }
    }

    /// Only handler errors are transient. Timeouts are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EffectError::Handler { .. })
    }

    /// Business-level record of this failure, attributed to the requirement.
    pub fn to_error_value(&self, requirement: &Requirement, now: i64) -> ErrorValue {
        ErrorValue::new(ErrorCode::EffectFailed, self.to_string(), now)
            .with_action(&requirement.action_id)
            .with_node_path(&requirement.flow_position.node_path)
            .with_context(json!({
                "requirementId": requirement.id,
                "effectType": requirement.effect_type,
                "kind": self.kind(),
            }))
    }
}
