//! Intent types and builder.
//!
//! An Intent is a typed request to run one domain action.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::hash::canonical_hash;

/// Action types under this prefix are host-internal and exempt from liveness accounting.
pub const SYSTEM_ACTION_PREFIX: &str = "system.";

/// A request to run one domain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// Name of the action to run.
    #[serde(rename = "type")]
    pub intent_type: String,

    /// Action input payload.
    #[serde(default)]
    pub input: serde_json::Value,

    /// Unique id. Empty means missing; such intents are rejected before any mutation.
    #[serde(default)]
    pub intent_id: String,
}

/// Builder for creating Intents with a fluent API.
#[derive(Debug, Default)]
pub struct IntentBuilder {
    intent_type: Option<String>,
    input: serde_json::Value,
    intent_id: Option<String>,
}

impl IntentBuilder {
    /// Create a new IntentBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the action name.
    pub fn action(mut self, intent_type: impl Into<String>) -> Self {
        self.intent_type = Some(intent_type.into());
        self
    }

    /// Set the input payload.
    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn id(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    /// Build the Intent.
    pub fn build(self) -> Result<Intent> {
        let intent_type = self
            .intent_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StrataError::InvalidIntent("action type is required".to_string()))?;

        Ok(Intent {
            intent_type,
            input: self.input,
            intent_id: self
                .intent_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        })
    }
}

impl Intent {
    /// Create a new IntentBuilder.
    pub fn builder() -> IntentBuilder {
        IntentBuilder::new()
    }

    /// Shorthand for an intent with an explicit id.
    pub fn new(
        intent_type: impl Into<String>,
        input: serde_json::Value,
        intent_id: impl Into<String>,
    ) -> Self {
        Self {
            intent_type: intent_type.into(),
            input,
            intent_id: intent_id.into(),
        }
    }

    /// Check the contract every intent must satisfy before it may touch state.
    pub fn validate(&self) -> Result<()> {
        if self.intent_id.trim().is_empty() {
            return Err(StrataError::MissingIntentId {
                intent_type: self.intent_type.clone(),
            });
        }
        Ok(())
    }

    /// Returns true for host-internal actions.
    pub fn is_system(&self) -> bool {
        self.intent_type.starts_with(SYSTEM_ACTION_PREFIX)
    }

    /// Hash of the intent content.
    pub fn content_hash(&self) -> String {
        canonical_hash(&serde_json::json!({
            "type": self.intent_type,
            "input": self.input,
            "intentId": self.intent_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_builder() {
        let intent = Intent::builder()
            .action("addTodo")
            .input(serde_json::json!({"title": "milk"}))
            .build()
            .unwrap();

        assert_eq!(intent.intent_type, "addTodo");
        assert!(!intent.intent_id.is_empty());
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn test_intent_builder_missing_action() {
        let result = Intent::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_intent_id_rejected() {
        let intent: Intent = serde_json::from_value(serde_json::json!({"type": "addTodo"})).unwrap();
        let err = intent.validate().unwrap_err();
        assert!(matches!(err, StrataError::MissingIntentId { .. }));
    }

    #[test]
    fn test_wire_format() {
        let intent = Intent::new("system.sync", serde_json::Value::Null, "i-1");
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "system.sync");
        assert_eq!(json["intentId"], "i-1");
        assert!(intent.is_system());
    }

    #[test]
    fn test_content_hash_stable() {
        let a = Intent::new("x", serde_json::json!({"a": 1}), "i");
        let b = Intent::new("x", serde_json::json!({"a": 1}), "i");
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
