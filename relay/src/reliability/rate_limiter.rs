// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::time::Instant;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

// Layer 3: Internal module imports
use super::config::RateLimitConfig;

/// Rejection returned when a sender's window is full.
///
/// Retriable: the window slides, so the same publish succeeds once old
/// events age out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate_limited: sender {sender} exceeded {limit} events per window")]
pub struct RateLimited {
    /// The throttled sender.
    pub sender: String,
    /// The limit that was hit.
    pub limit: u32,
}

/// Sliding-window request limits keyed by sender.
///
/// Each sender keeps a deque of recent event instants; events older than
/// the window are pruned on every check. Per-sender overrides take
/// precedence over the global `max_events`.
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    config: RwLock<RateLimitConfig>,
}

impl RateLimiter {
    /// Create a limiter with the given tuning.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config: RwLock::new(config),
        }
    }

    /// Swap in new tuning. Recorded events keep their timestamps; only
    /// the window and limits change.
    pub fn update_config(&self, config: RateLimitConfig) {
        *self.config.write() = config;
    }

    /// The limit applying to a sender (override or global).
    pub fn limit_for(&self, sender: &str) -> u32 {
        let config = self.config.read();
        config
            .overrides
            .get(sender)
            .copied()
            .unwrap_or(config.max_events)
    }

    /// Admit one event for `sender`, or reject if the window is full.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] when the sender already has `limit`
    /// events inside the sliding window.
    pub fn check_and_record(&self, sender: &str) -> Result<(), RateLimited> {
        let (window, limit) = {
            let config = self.config.read();
            let limit = config
                .overrides
                .get(sender)
                .copied()
                .unwrap_or(config.max_events);
            (config.window, limit)
        };

        let now = Instant::now();
        let mut events = self.windows.entry(sender.to_string()).or_default();
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
        if events.len() >= limit as usize {
            return Err(RateLimited {
                sender: sender.to_string(),
                limit,
            });
        }
        events.push_back(now);
        Ok(())
    }

    /// Events currently inside the window for a sender.
    pub fn current_usage(&self, sender: &str) -> usize {
        let window = self.config.read().window;
        let now = Instant::now();
        self.windows
            .get(sender)
            .map(|events| {
                events
                    .iter()
                    .filter(|at| now.duration_since(**at) < window)
                    .count()
            })
            .unwrap_or(0)
    }
}
