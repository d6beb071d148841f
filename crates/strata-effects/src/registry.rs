//! Effect registry: effect type to handler, with per-handler options.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::EffectError;
use crate::handler::EffectHandler;

/// Per-handler execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectOptions {
    /// Upper bound on one attempt. Expiry fails the effect without retrying.
    pub timeout: Duration,

    /// Extra attempts after a handler error.
    pub retries: u32,

    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 0,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl EffectOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// A registered handler and its options.
#[derive(Clone)]
pub struct RegisteredEffect {
    pub handler: Arc<dyn EffectHandler>,
    pub options: EffectOptions,
}

/// Maps effect types to handlers.
///
/// Filled at setup time and then shared read-only behind an `Arc`.
#[derive(Clone, Default)]
pub struct EffectRegistry {
    handlers: HashMap<String, RegisteredEffect>,
    defaults: EffectOptions,
}

impl EffectRegistry {
    /// Create an empty registry with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose plain registrations use `defaults`.
    pub fn with_defaults(defaults: EffectOptions) -> Self {
        Self {
            handlers: HashMap::new(),
            defaults,
        }
    }

    /// Register a handler with the registry's default options.
    pub fn register(
        &mut self,
        effect_type: impl Into<String>,
        handler: impl EffectHandler + 'static,
    ) -> Result<(), EffectError> {
        let options = self.defaults;
        self.register_with_options(effect_type, handler, options)
    }

    /// Register a handler with explicit options. A second registration for the
    /// same type is rejected.
    pub fn register_with_options(
        &mut self,
        effect_type: impl Into<String>,
        handler: impl EffectHandler + 'static,
        options: EffectOptions,
    ) -> Result<(), EffectError> {
        self.register_arc(effect_type, Arc::new(handler), options)
    }

    /// Register an already shared handler.
    pub fn register_arc(
        &mut self,
        effect_type: impl Into<String>,
        handler: Arc<dyn EffectHandler>,
        options: EffectOptions,
    ) -> Result<(), EffectError> {
        let effect_type = effect_type.into();
        if self.handlers.contains_key(&effect_type) {
            return Err(EffectError::DuplicateHandler { effect_type });
        }
        debug!(effect_type = %effect_type, timeout_ms = options.timeout.as_millis() as u64, "effect handler registered");
        self.handlers
            .insert(effect_type, RegisteredEffect { handler, options });
        Ok(())
    }

    /// Look up a handler.
    pub fn get(&self, effect_type: &str) -> Option<&RegisteredEffect> {
        self.handlers.get(effect_type)
    }

    /// Check whether a type has a handler.
    pub fn contains(&self, effect_type: &str) -> bool {
        self.handlers.contains_key(effect_type)
    }

    /// Registered effect types, sorted.
    pub fn effect_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("effect_types", &self.effect_types())
            .field("defaults", &self.defaults)
            .finish()
    }
}
