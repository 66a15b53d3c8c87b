// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use super::envelope::Envelope;
use crate::subject::Subject;

/// Per-envelope bounds on hops, TTL, call count, and ancestry.
///
/// The budget is the only part of an envelope the bus mutates: every
/// accepted hop increments `hop_count`, decrements
/// `call_budget_remaining`, and appends the forwarding `from` subject to
/// `ancestor_chain`. All fields move monotonically, which is what makes
/// agent-to-agent fan-out terminate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Hops taken so far; incremented on each forward.
    pub hop_count: u32,

    /// Rejects once `hop_count` reaches this bound.
    pub max_hops: u32,

    /// Prior `from` subjects, used for cycle detection.
    pub ancestor_chain: Vec<String>,

    /// Absolute expiry, milliseconds since the Unix epoch.
    pub ttl: i64,

    /// Remaining downstream calls; rejects when exhausted.
    pub call_budget_remaining: i64,
}

impl Budget {
    /// A fresh budget with no hops taken.
    pub fn new(max_hops: u32, ttl: DateTime<Utc>, call_budget: i64) -> Self {
        Self {
            hop_count: 0,
            max_hops,
            ancestor_chain: Vec::new(),
            ttl: ttl.timestamp_millis(),
            call_budget_remaining: call_budget,
        }
    }

    /// Whether the TTL has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.ttl
    }
}

/// Why an envelope was refused by budget enforcement.
///
/// Budget rejections are terminal: the envelope moves to the dead-letter
/// queue and is not retried. The `Display` form leads with the stable
/// reason tag recorded in dead-letter sidecars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRejection {
    /// `now` is past the envelope's absolute expiry.
    #[error("ttl_expired: envelope expired at {ttl} ms")]
    TtlExpired {
        /// The expiry that elapsed, milliseconds since epoch.
        ttl: i64,
    },

    /// The hop counter reached its bound.
    #[error("hop_limit: {hop_count} of {max_hops} hops used")]
    HopLimit {
        /// Hops taken when rejected.
        hop_count: u32,
        /// The configured bound.
        max_hops: u32,
    },

    /// No downstream calls remain.
    #[error("budget_exhausted: call budget spent")]
    BudgetExhausted,

    /// The target already appears in the ancestor chain.
    #[error("cycle_detected: {target} is an ancestor")]
    CycleDetected {
        /// The subject that closed the cycle.
        target: String,
    },
}

impl BudgetRejection {
    /// The stable reason tag (`ttl_expired`, `hop_limit`,
    /// `budget_exhausted`, `cycle_detected`).
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TtlExpired { .. } => "ttl_expired",
            Self::HopLimit { .. } => "hop_limit",
            Self::BudgetExhausted => "budget_exhausted",
            Self::CycleDetected { .. } => "cycle_detected",
        }
    }
}

/// Decide whether an envelope may take one more hop toward `target`.
///
/// Pure function: no clocks are read (the caller supplies `now`) and no
/// state is touched. Checks run in a fixed order - TTL, hop limit, call
/// budget, cycle - and the first violation wins. On acceptance returns
/// the successor budget: `hop_count + 1`, `call_budget_remaining - 1`,
/// and the envelope's `from` subject appended to the ancestor chain if
/// not already present.
///
/// # Errors
///
/// Returns the first matching [`BudgetRejection`].
pub fn enforce_budget(
    envelope: &Envelope,
    target: &Subject,
    now: DateTime<Utc>,
) -> Result<Budget, BudgetRejection> {
    let budget = &envelope.budget;

    if budget.is_expired(now) {
        return Err(BudgetRejection::TtlExpired { ttl: budget.ttl });
    }
    if budget.hop_count >= budget.max_hops {
        return Err(BudgetRejection::HopLimit {
            hop_count: budget.hop_count,
            max_hops: budget.max_hops,
        });
    }
    if budget.call_budget_remaining <= 0 {
        return Err(BudgetRejection::BudgetExhausted);
    }
    if budget
        .ancestor_chain
        .iter()
        .any(|ancestor| ancestor == target.as_str())
    {
        return Err(BudgetRejection::CycleDetected {
            target: target.to_string(),
        });
    }

    let mut updated = budget.clone();
    updated.hop_count += 1;
    updated.call_budget_remaining -= 1;
    let from = envelope.from.as_str();
    if !updated.ancestor_chain.iter().any(|a| a == from) {
        updated.ancestor_chain.push(from.to_string());
    }
    Ok(updated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn envelope_with_budget(budget: Budget) -> Envelope {
        Envelope::new(
            Subject::new("relay.agent.alpha.target").unwrap(),
            Subject::new("relay.agent.alpha.origin").unwrap(),
            json!({"k": "v"}),
            budget,
        )
    }

    fn target() -> Subject {
        Subject::new("relay.agent.alpha.target").unwrap()
    }

    fn live_budget() -> Budget {
        Budget::new(3, Utc::now() + Duration::minutes(1), 5)
    }

    #[test]
    fn test_accept_updates_budget() {
        let envelope = envelope_with_budget(live_budget());
        let updated = enforce_budget(&envelope, &target(), Utc::now()).unwrap();

        assert_eq!(updated.hop_count, 1);
        assert_eq!(updated.call_budget_remaining, 4);
        assert_eq!(
            updated.ancestor_chain,
            vec!["relay.agent.alpha.origin".to_string()]
        );
    }

    #[test]
    fn test_ttl_expiry_rejected_first() {
        let mut budget = live_budget();
        budget.ttl = (Utc::now() - Duration::seconds(1)).timestamp_millis();
        // Also exhausted, but TTL must win.
        budget.call_budget_remaining = 0;
        let envelope = envelope_with_budget(budget);

        let rejection = enforce_budget(&envelope, &target(), Utc::now()).unwrap_err();
        assert_eq!(rejection.reason(), "ttl_expired");
        assert!(rejection.to_string().starts_with("ttl_expired"));
    }

    #[test]
    fn test_hop_limit() {
        let mut budget = live_budget();
        budget.hop_count = 3;
        let envelope = envelope_with_budget(budget);

        let rejection = enforce_budget(&envelope, &target(), Utc::now()).unwrap_err();
        assert_eq!(rejection.reason(), "hop_limit");
    }

    #[test]
    fn test_call_budget_exhausted() {
        let mut budget = live_budget();
        budget.call_budget_remaining = 0;
        let envelope = envelope_with_budget(budget);

        let rejection = enforce_budget(&envelope, &target(), Utc::now()).unwrap_err();
        assert_eq!(rejection.reason(), "budget_exhausted");
    }

    #[test]
    fn test_cycle_detected() {
        let mut budget = live_budget();
        budget.ancestor_chain = vec!["relay.agent.alpha.target".to_string()];
        let envelope = envelope_with_budget(budget);

        let rejection = enforce_budget(&envelope, &target(), Utc::now()).unwrap_err();
        assert_eq!(rejection.reason(), "cycle_detected");
    }

    #[test]
    fn test_repeated_from_not_duplicated_in_chain() {
        let mut budget = live_budget();
        budget.ancestor_chain = vec!["relay.agent.alpha.origin".to_string()];
        budget.hop_count = 1;
        let envelope = envelope_with_budget(budget);

        let updated = enforce_budget(&envelope, &target(), Utc::now()).unwrap();
        assert_eq!(updated.ancestor_chain.len(), 1);
        assert_eq!(updated.hop_count, 2);
    }
}
