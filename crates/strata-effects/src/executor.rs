//! Effect executor.
//!
//! Runs one requirement's handler under its timeout and retry policy. Every
//! outcome, including panics inside the handler, becomes an [`EffectResult`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use futures::FutureExt;
use strata_core::{Patch, Requirement, Snapshot};
use tracing::{debug, warn};

use crate::error::EffectError;
use crate::handler::EffectContext;
use crate::registry::{EffectRegistry, RegisteredEffect};

/// Outcome of one effect execution.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectResult {
    pub success: bool,

    /// Patches to apply on success. Empty on failure.
    pub patches: Vec<Patch>,

    pub error: Option<EffectError>,

    /// Handler invocations made, including retries.
    pub attempts: u32,
}

impl EffectResult {
    pub fn succeeded(patches: Vec<Patch>, attempts: u32) -> Self {
        Self {
            success: true,
            patches,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: EffectError, attempts: u32) -> Self {
        Self {
            success: false,
            patches: Vec::new(),
            error: Some(error),
            attempts,
        }
    }
}

/// Executes requirements against a shared registry.
#[derive(Debug, Clone)]
pub struct EffectExecutor {
    registry: Arc<EffectRegistry>,
}

impl EffectExecutor {
    pub fn new(registry: Arc<EffectRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Create an abort signal pair for [`EffectExecutor::execute_abortable`].
    pub fn abort_pair() -> (AbortHandle, AbortRegistration) {
        AbortHandle::new_pair()
    }

    /// Execute a requirement to completion.
    pub async fn execute(&self, requirement: &Requirement, snapshot: Arc<Snapshot>) -> EffectResult {
        let (_handle, registration) = AbortHandle::new_pair();
        self.execute_abortable(requirement, snapshot, registration).await
    }

    /// Execute a requirement, stopping early if the paired [`AbortHandle`] fires.
    ///
    /// Aborting drops the in-flight attempt, its timer included, and reports
    /// [`EffectError::Cancelled`].
    pub async fn execute_abortable(
        &self,
        requirement: &Requirement,
        snapshot: Arc<Snapshot>,
        abort: AbortRegistration,
    ) -> EffectResult {
        let effect_type = requirement.effect_type.clone();
        let Some(entry) = self.registry.get(&effect_type) else {
            warn!(effect_type = %effect_type, requirement = %requirement.id, "no handler registered");
            return EffectResult::failed(EffectError::MissingHandler { effect_type }, 0);
        };

        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let run = run_attempts(entry.clone(), requirement.clone(), snapshot, attempts.clone());
        match Abortable::new(run, abort).await {
            Ok(result) => result,
            Err(_aborted) => {
                debug!(effect_type = %effect_type, requirement = %requirement.id, "effect cancelled");
                EffectResult::failed(
                    EffectError::Cancelled { effect_type },
                    attempts.load(std::sync::atomic::Ordering::SeqCst),
                )
            }
        }
    }
}

async fn run_attempts(
    entry: RegisteredEffect,
    requirement: Requirement,
    snapshot: Arc<Snapshot>,
    attempts: Arc<std::sync::atomic::AtomicU32>,
) -> EffectResult {
    let effect_type = requirement.effect_type.clone();
    let options = entry.options;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        attempts.store(attempt, std::sync::atomic::Ordering::SeqCst);

        let ctx = EffectContext::new(requirement.clone(), snapshot.clone(), attempt);
        let call = AssertUnwindSafe(entry.handler.handle(ctx)).catch_unwind();

        let error = match tokio::time::timeout(options.timeout, call).await {
            Err(_) => {
                warn!(effect_type = %effect_type, requirement = %requirement.id, attempt, "effect timed out");
                EffectError::Timeout {
                    effect_type: effect_type.clone(),
                    timeout_ms: duration_ms(options.timeout),
                }
            }
            Ok(Ok(Ok(output))) => match output.into_patches() {
                Ok(patches) => {
                    debug!(effect_type = %effect_type, patches = patches.len(), attempt, "effect succeeded");
                    return EffectResult::succeeded(patches, attempt);
                }
                Err(err) => handler_error(&effect_type, format!("handler returned malformed patches: {}", err)),
            },
            Ok(Ok(Err(err))) => handler_error(&effect_type, format!("{:#}", err)),
            Ok(Err(panic)) => handler_error(&effect_type, panic_message(panic.as_ref())),
        };

        if !error.is_retryable() || attempt > options.retries {
            warn!(effect_type = %effect_type, attempt, error = %error, "effect failed");
            return EffectResult::failed(error, attempt);
        }

        warn!(effect_type = %effect_type, attempt, error = %error, "effect attempt failed, retrying");
        tokio::time::sleep(options.retry_delay).await;
    }
}

fn handler_error(effect_type: &str, message: String) -> EffectError {
    EffectError::Handler {
        effect_type: effect_type.to_string(),
        message,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use strata_core::FlowPosition;

    use crate::handler::{handler_fn, HandlerOutput};
    use crate::registry::EffectOptions;

    fn requirement(effect_type: &str) -> Requirement {
        Requirement {
            id: "req-1".to_string(),
            effect_type: effect_type.to_string(),
            params: json!({"id": 7}),
            action_id: "load".to_string(),
            intent_id: "i-1".to_string(),
            flow_position: FlowPosition {
                node_path: "root.steps.1".to_string(),
                snapshot_version: 1,
            },
            created_at: 0,
        }
    }

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::new(json!({"loading": true}), "h"))
    }

    fn fast(retries: u32) -> EffectOptions {
        EffectOptions::default()
            .with_timeout(Duration::from_millis(50))
            .with_retries(retries)
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_returns_patches() {
        let mut registry = EffectRegistry::new();
        registry
            .register(
                "api.fetch",
                handler_fn(|ctx| async move {
                    assert_eq!(ctx.snapshot().data["loading"], json!(true));
                    let id = ctx.param("id").cloned().unwrap_or_default();
                    Ok(Patch::set("result", id).into())
                }),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("api.fetch"), snapshot()).await;

        assert!(result.success);
        assert_eq!(result.patches, vec![Patch::set("result", json!(7))]);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_json_output_is_normalized() {
        let mut registry = EffectRegistry::new();
        registry
            .register(
                "api.fetch",
                handler_fn(|_ctx| async { Ok(json!({"patches": [{"op": "set", "path": "done", "value": true}]}).into()) }),
            )
            .unwrap();
        registry
            .register_with_options(
                "api.bad",
                handler_fn(|_ctx| async { Ok(json!(42).into()) }),
                fast(2),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("api.fetch"), snapshot()).await;
        assert_eq!(result.patches, vec![Patch::set("done", json!(true))]);

        let result = executor.execute(&requirement("api.bad"), snapshot()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), "handler");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let executor = EffectExecutor::new(Arc::new(EffectRegistry::new()));
        let result = executor.execute(&requirement("nope"), snapshot()).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), "missing_handler");
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_handler_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut registry = EffectRegistry::new();
        registry
            .register_with_options(
                "flaky",
                handler_fn(move |_| {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            anyhow::bail!("transient");
                        }
                        Ok(HandlerOutput::None)
                    }
                }),
                fast(2),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("flaky"), snapshot()).await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut registry = EffectRegistry::new();
        registry
            .register_with_options(
                "broken",
                handler_fn(|_| async { Err(anyhow::anyhow!("boom")) }),
                fast(1),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("broken"), snapshot()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(
            result.error,
            Some(EffectError::Handler {
                effect_type: "broken".to_string(),
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut registry = EffectRegistry::new();
        registry
            .register_with_options(
                "slow",
                handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(HandlerOutput::None)
                    }
                }),
                fast(3),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("slow"), snapshot()).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), "timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let mut registry = EffectRegistry::new();
        registry
            .register(
                "panics",
                handler_fn(|_| async {
                    if true {
                        panic!("bad handler");
                    }
                    Ok(HandlerOutput::None)
                }),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let result = executor.execute(&requirement("panics"), snapshot()).await;

        assert!(!result.success);
        match result.error.unwrap() {
            EffectError::Handler { message, .. } => assert!(message.contains("bad handler")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_abort_reports_cancelled() {
        let mut registry = EffectRegistry::new();
        registry
            .register(
                "hang",
                handler_fn(|_| async {
                    futures::future::pending::<()>().await;
                    Ok(HandlerOutput::None)
                }),
            )
            .unwrap();

        let executor = EffectExecutor::new(Arc::new(registry));
        let (handle, registration) = EffectExecutor::abort_pair();
        let req = requirement("hang");
        let task = tokio::spawn(async move { executor.execute_abortable(&req, snapshot(), registration).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
        let result = task.await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), "cancelled");
        assert_eq!(result.attempts, 1);
    }
}
