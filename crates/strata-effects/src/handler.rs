//! Effect handler trait and the values handlers exchange with the executor.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use strata_core::{Patch, Requirement, Snapshot};

/// Read-only view handed to a handler.
///
/// The snapshot is shared behind an `Arc` and only exposed by reference, so a
/// handler has no way to mutate host state. Its only output is the patches it
/// returns.
#[derive(Debug, Clone)]
pub struct EffectContext {
    requirement: Requirement,
    snapshot: Arc<Snapshot>,
    attempt: u32,
}

impl EffectContext {
    pub fn new(requirement: Requirement, snapshot: Arc<Snapshot>, attempt: u32) -> Self {
        Self {
            requirement,
            snapshot,
            attempt,
        }
    }

    /// The requirement being fulfilled.
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Snapshot as committed just before dispatch.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Evaluated effect parameters.
    pub fn params(&self) -> &Value {
        &self.requirement.params
    }

    /// One parameter by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.requirement.params.get(name)
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// What a handler returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HandlerOutput {
    #[default]
    None,
    Patch(Patch),
    Patches(Vec<Patch>),
    /// Untyped return, normalized by [`HandlerOutput::from_value`] when the
    /// executor collects it.
    Json(Value),
}

impl HandlerOutput {
    /// Flatten to a patch list. Fails only for a `Json` output that is not
    /// patch-shaped.
    pub fn into_patches(self) -> serde_json::Result<Vec<Patch>> {
        match self {
            HandlerOutput::None => Ok(Vec::new()),
            HandlerOutput::Patch(patch) => Ok(vec![patch]),
            HandlerOutput::Patches(patches) => Ok(patches),
            HandlerOutput::Json(value) => Self::from_value(value)?.into_patches(),
        }
    }

    /// Normalize a loosely shaped JSON return: `null`, a single patch, an array
    /// of patches, or an object carrying a `patches` array.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        match value {
            Value::Null => Ok(HandlerOutput::None),
            Value::Array(_) => Ok(HandlerOutput::Patches(serde_json::from_value(value)?)),
            Value::Object(mut map) if !map.contains_key("op") && map.contains_key("patches") => {
                let patches = map.remove("patches").unwrap_or(Value::Null);
                Ok(HandlerOutput::Patches(serde_json::from_value(patches)?))
            }
            other => Ok(HandlerOutput::Patch(serde_json::from_value(other)?)),
        }
    }
}

impl From<Patch> for HandlerOutput {
    fn from(patch: Patch) -> Self {
        HandlerOutput::Patch(patch)
    }
}

impl From<Vec<Patch>> for HandlerOutput {
    fn from(patches: Vec<Patch>) -> Self {
        HandlerOutput::Patches(patches)
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Json(value)
    }
}

impl From<()> for HandlerOutput {
    fn from(_: ()) -> Self {
        HandlerOutput::None
    }
}

/// An effect handler.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Perform the effect. Errors are reported as failed results and may be retried.
    async fn handle(&self, ctx: EffectContext) -> anyhow::Result<HandlerOutput>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EffectHandler for FnHandler<F>
where
    F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    async fn handle(&self, ctx: EffectContext) -> anyhow::Result<HandlerOutput> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_normalization() {
        let single = HandlerOutput::from(json!({"op": "set", "path": "a", "value": 1}));
        assert_eq!(single.into_patches().unwrap(), vec![Patch::set("a", json!(1))]);

        let list = HandlerOutput::from(json!([{"op": "unset", "path": "a"}]));
        assert_eq!(list.into_patches().unwrap(), vec![Patch::unset("a")]);

        let wrapped = HandlerOutput::from(json!({"patches": [{"op": "unset", "path": "b"}]}));
        assert_eq!(wrapped.into_patches().unwrap(), vec![Patch::unset("b")]);

        assert!(HandlerOutput::from(Value::Null).into_patches().unwrap().is_empty());
        assert!(HandlerOutput::from(json!("nope")).into_patches().is_err());
    }

    #[test]
    fn test_typed_outputs_pass_through() {
        let patch = Patch::set("a", json!(1));
        assert_eq!(HandlerOutput::from(patch.clone()).into_patches().unwrap(), vec![patch]);
        assert!(HandlerOutput::from(()).into_patches().unwrap().is_empty());
    }
}
