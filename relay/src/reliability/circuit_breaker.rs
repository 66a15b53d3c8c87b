// Layer 1: Standard library imports
use std::time::Instant;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::config::CircuitBreakerConfig;

/// Observable breaker state for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Deliveries flow; failures are being counted.
    Closed,
    /// All deliveries rejected until the cooldown elapses.
    Open,
    /// A bounded number of probes is being admitted.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probes_issued: u32, successes: u32 },
}

/// One CLOSED / OPEN / HALF_OPEN state machine per endpoint hash.
///
/// CLOSED counts consecutive failures and opens at the threshold. OPEN
/// rejects everything until the cooldown elapses, then turns HALF_OPEN,
/// which admits a bounded number of probes: enough consecutive successes
/// close the breaker, any failure re-opens it and restarts the cooldown.
pub struct CircuitBreakerManager {
    states: DashMap<String, State>,
    config: RwLock<CircuitBreakerConfig>,
}

impl CircuitBreakerManager {
    /// Create a manager with the given tuning.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            config: RwLock::new(config),
        }
    }

    /// Swap in new tuning; existing per-endpoint states carry over.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        *self.config.write() = config;
    }

    /// Whether a delivery to this endpoint may proceed right now.
    ///
    /// Calling `check` while HALF_OPEN consumes one probe slot.
    pub fn check(&self, hash: &str) -> bool {
        let config = self.config.read().clone();
        let mut entry = self
            .states
            .entry(hash.to_string())
            .or_insert(State::Closed { failures: 0 });

        match *entry {
            State::Closed { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= config.cooldown {
                    debug!(hash, "breaker cooled down, admitting probe");
                    *entry = State::HalfOpen {
                        probes_issued: 1,
                        successes: 0,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen {
                probes_issued,
                successes,
            } => {
                if probes_issued < config.half_open_probe_count {
                    *entry = State::HalfOpen {
                        probes_issued: probes_issued + 1,
                        successes,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self, hash: &str) {
        let config = self.config.read().clone();
        let mut entry = self
            .states
            .entry(hash.to_string())
            .or_insert(State::Closed { failures: 0 });

        match *entry {
            State::Closed { .. } => {
                *entry = State::Closed { failures: 0 };
            }
            State::Open { .. } => {
                // A success while open means a stale in-flight delivery;
                // the breaker stays open until its cooldown elapses.
            }
            State::HalfOpen {
                probes_issued,
                successes,
            } => {
                let successes = successes + 1;
                if successes >= config.success_to_close {
                    debug!(hash, "breaker closed after successful probes");
                    *entry = State::Closed { failures: 0 };
                } else {
                    *entry = State::HalfOpen {
                        probes_issued,
                        successes,
                    };
                }
            }
        }
    }

    /// Record a failed delivery.
    pub fn record_failure(&self, hash: &str) {
        let config = self.config.read().clone();
        let mut entry = self
            .states
            .entry(hash.to_string())
            .or_insert(State::Closed { failures: 0 });

        match *entry {
            State::Closed { failures } => {
                let failures = failures + 1;
                if failures >= config.failure_threshold {
                    warn!(hash, failures, "circuit breaker opened");
                    *entry = State::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    *entry = State::Closed { failures };
                }
            }
            State::Open { .. } => {}
            State::HalfOpen { .. } => {
                warn!(hash, "probe failed, breaker re-opened");
                *entry = State::Open {
                    opened_at: Instant::now(),
                };
            }
        }
    }

    /// The observable state for an endpoint (CLOSED when never seen).
    pub fn state(&self, hash: &str) -> BreakerState {
        match self.states.get(hash).map(|s| *s) {
            None | Some(State::Closed { .. }) => BreakerState::Closed,
            Some(State::Open { .. }) => BreakerState::Open,
            Some(State::HalfOpen { .. }) => BreakerState::HalfOpen,
        }
    }

    /// Drop per-endpoint state, e.g. when an endpoint unregisters.
    pub fn forget(&self, hash: &str) {
        self.states.remove(hash);
    }
}
