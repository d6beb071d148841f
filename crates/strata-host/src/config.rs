//! Host configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_effects::EffectOptions;
use tracing::warn;

/// Configuration for a [`Host`](crate::Host).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Hook re-injections allowed per proposal before the liveness guard trips.
    pub liveness_ceiling: u32,

    /// Default per-attempt effect timeout in milliseconds.
    pub effect_timeout_ms: u64,

    /// Default number of retries after a handler error.
    pub effect_retries: u32,

    /// Default pause between effect attempts in milliseconds.
    pub effect_retry_delay_ms: u64,

    /// Buffer size of the trace event broadcast channel.
    pub trace_channel_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            liveness_ceiling: 100,
            effect_timeout_ms: 30_000,
            effect_retries: 0,
            effect_retry_delay_ms: 100,
            trace_channel_capacity: 1000,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `STRATA_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        read_env("STRATA_LIVENESS_CEILING", &mut config.liveness_ceiling);
        read_env("STRATA_EFFECT_TIMEOUT_MS", &mut config.effect_timeout_ms);
        read_env("STRATA_EFFECT_RETRIES", &mut config.effect_retries);
        read_env("STRATA_EFFECT_RETRY_DELAY_MS", &mut config.effect_retry_delay_ms);
        read_env("STRATA_TRACE_CAPACITY", &mut config.trace_channel_capacity);
        config
    }

    /// Set the liveness ceiling.
    pub fn with_liveness_ceiling(mut self, ceiling: u32) -> Self {
        self.liveness_ceiling = ceiling;
        self
    }

    /// Set the default effect timeout.
    pub fn with_effect_timeout(mut self, timeout: Duration) -> Self {
        self.effect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Effect options used by handlers registered without explicit options.
    pub fn effect_options(&self) -> EffectOptions {
        EffectOptions {
            timeout: Duration::from_millis(self.effect_timeout_ms),
            retries: self.effect_retries,
            retry_delay: Duration::from_millis(self.effect_retry_delay_ms),
        }
    }
}

fn read_env<T: FromStr>(name: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(variable = name, value = %raw, "ignoring unparseable setting"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.liveness_ceiling, 100);
        assert_eq!(config.effect_options().timeout, Duration::from_secs(30));
        assert_eq!(config.effect_options().retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: HostConfig = serde_json::from_str(r#"{"liveness_ceiling": 5}"#).unwrap();
        assert_eq!(config.liveness_ceiling, 5);
        assert_eq!(config.trace_channel_capacity, 1000);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("STRATA_EFFECT_RETRIES", "4");
        std::env::set_var("STRATA_TRACE_CAPACITY", "lots");
        let config = HostConfig::from_env();
        std::env::remove_var("STRATA_EFFECT_RETRIES");
        std::env::remove_var("STRATA_TRACE_CAPACITY");

        assert_eq!(config.effect_retries, 4);
        assert_eq!(config.trace_channel_capacity, 1000);
    }
}
