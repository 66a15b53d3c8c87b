// Layer 1: Standard library imports
use std::collections::HashMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default mailbox depth before deliveries are refused.
pub const DEFAULT_MAX_MAILBOX_SIZE: u64 = 1000;

/// Default pressure ratio at which a warning signal fires.
pub const DEFAULT_PRESSURE_WARNING_AT: f64 = 0.8;

/// Default consecutive failures before a breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before an open breaker admits probes.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Default number of probes admitted while half-open.
pub const DEFAULT_HALF_OPEN_PROBE_COUNT: u32 = 3;

/// Default consecutive successes that close a half-open breaker.
pub const DEFAULT_SUCCESS_TO_CLOSE: u32 = 2;

/// Default sliding-window span for rate limiting.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default events admitted per sender per window.
pub const DEFAULT_RATE_MAX_EVENTS: u32 = 120;

/// Mailbox admission control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Pending messages a mailbox may hold before rejects.
    pub max_mailbox_size: u64,

    /// Fraction of capacity at which warning signals fire.
    pub pressure_warning_at: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_mailbox_size: DEFAULT_MAX_MAILBOX_SIZE,
            pressure_warning_at: DEFAULT_PRESSURE_WARNING_AT,
        }
    }
}

/// Per-endpoint circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that flip CLOSED to OPEN.
    pub failure_threshold: u32,

    /// How long OPEN holds before HALF_OPEN.
    pub cooldown: Duration,

    /// Deliveries admitted while HALF_OPEN.
    pub half_open_probe_count: u32,

    /// Consecutive successes that restore CLOSED.
    pub success_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            half_open_probe_count: DEFAULT_HALF_OPEN_PROBE_COUNT,
            success_to_close: DEFAULT_SUCCESS_TO_CLOSE,
        }
    }
}

/// Sliding-window rate limits keyed by sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window span.
    pub window: Duration,

    /// Events admitted per window for senders without an override.
    pub max_events: u32,

    /// Per-sender overrides of `max_events`.
    pub overrides: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_RATE_WINDOW,
            max_events: DEFAULT_RATE_MAX_EVENTS,
            overrides: HashMap::new(),
        }
    }
}

/// The reliability knobs swapped atomically by `reload_config`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Mailbox admission control.
    pub backpressure: BackpressureConfig,

    /// Breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Sender rate limits.
    pub rate_limit: RateLimitConfig,
}

impl ReliabilityConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.backpressure.max_mailbox_size == 0 {
            return Err("backpressure.max_mailbox_size must be > 0".to_string());
        }
        if !(self.backpressure.pressure_warning_at > 0.0
            && self.backpressure.pressure_warning_at <= 1.0)
        {
            return Err("backpressure.pressure_warning_at must be in (0, 1]".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be > 0".to_string());
        }
        if self.circuit_breaker.half_open_probe_count == 0 {
            return Err("circuit_breaker.half_open_probe_count must be > 0".to_string());
        }
        if self.circuit_breaker.success_to_close == 0 {
            return Err("circuit_breaker.success_to_close must be > 0".to_string());
        }
        if self.rate_limit.window.is_zero() {
            return Err("rate_limit.window must be > 0".to_string());
        }
        if self.rate_limit.max_events == 0 {
            return Err("rate_limit.max_events must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ReliabilityConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_mailbox_rejected() {
        let mut config = ReliabilityConfig::default();
        config.backpressure.max_mailbox_size = 0;
        assert!(config.validate().unwrap_err().contains("max_mailbox_size"));
    }

    #[test]
    fn test_warning_ratio_bounds() {
        let mut config = ReliabilityConfig::default();
        config.backpressure.pressure_warning_at = 0.0;
        assert!(config.validate().is_err());
        config.backpressure.pressure_warning_at = 1.5;
        assert!(config.validate().is_err());
        config.backpressure.pressure_warning_at = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: ReliabilityConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReliabilityConfig::default());
    }
}
