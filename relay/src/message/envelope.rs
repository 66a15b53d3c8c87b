// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use super::budget::Budget;
use super::id::MessageId;
use crate::subject::Subject;

/// The immutable message carrier.
///
/// Payloads are opaque to the bus: any JSON value passes through
/// untouched. The `id` is assigned on first accept (it doubles as the
/// Maildir filename); `created_at` is stamped at publish when the
/// producer left it out. Unknown wire fields are captured in `extra` and
/// written back verbatim, so producers and consumers can evolve without
/// the bus in the way.
///
/// # Example
/// ```rust
/// use chrono::{Duration, Utc};
/// use dork_relay::message::{Budget, Envelope};
/// use dork_relay::subject::Subject;
/// use serde_json::json;
///
/// let envelope = Envelope::new(
///     Subject::new("relay.agent.alpha.worker").unwrap(),
///     Subject::new("relay.agent.alpha.origin").unwrap(),
///     json!({"task": "summarize"}),
///     Budget::new(3, Utc::now() + Duration::minutes(1), 5),
/// );
/// assert!(envelope.id.is_none()); // assigned on first accept
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message id; absent until first accepted by the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Routing key this envelope is addressed to.
    pub subject: Subject,

    /// Origin address; appended to the ancestor chain on forwarding.
    pub from: Subject,

    /// Optional response target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Subject>,

    /// Publisher timestamp; stamped by the bus when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Opaque payload; never inspected by the bus.
    pub payload: serde_json::Value,

    /// Fan-out bounds, mutated per hop.
    pub budget: Budget,

    /// Unknown wire fields, preserved on read and re-write.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Build an envelope ready for publishing.
    pub fn new(subject: Subject, from: Subject, payload: serde_json::Value, budget: Budget) -> Self {
        Self {
            id: None,
            subject,
            from,
            reply_to: None,
            created_at: None,
            payload,
            budget,
            extra: serde_json::Map::new(),
        }
    }

    /// Builder method: set the reply target.
    pub fn with_reply_to(mut self, reply_to: Subject) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Builder method: pin the message id.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builder method: pin the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// The expiry instant derived from the budget TTL.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.budget.ttl)
    }

    /// Structural validation at the bus boundary.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the budget invariants do not hold;
    /// malformed subjects never get this far (they fail typed parsing).
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let chain_len = u32::try_from(self.budget.ancestor_chain.len())
            .map_err(|_| EnvelopeError::AncestorChainTooLong)?;
        if self.budget.hop_count > chain_len + 1 {
            return Err(EnvelopeError::HopCountAheadOfChain {
                hop_count: self.budget.hop_count,
                chain_len: self.budget.ancestor_chain.len(),
            });
        }
        Ok(())
    }
}

/// Structural envelope validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// `hop_count` exceeds `len(ancestor_chain) + 1`.
    #[error("hop count {hop_count} exceeds ancestor chain length {chain_len} + 1")]
    HopCountAheadOfChain {
        /// Claimed hop count.
        hop_count: u32,
        /// Observed chain length.
        chain_len: usize,
    },

    /// The ancestor chain does not fit the hop counter's domain.
    #[error("ancestor chain too long")]
    AncestorChainTooLong,
}

/// Index status of a delivered message, mirroring its Maildir location.
///
/// `pending` lives in `new/`, `failed` in `failed/`; `delivered` has been
/// claimed, handled, and removed from `cur/`. The only transitions are
/// `pending -> delivered` and `pending -> failed`; `failed` is terminal
/// until purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Sitting in `new/`, not yet claimed.
    Pending,
    /// Claimed and handled; removed from `cur/`.
    Delivered,
    /// Moved to `failed/`; terminal until purged.
    Failed,
}

impl MessageStatus {
    /// Stable lowercase name used in the index and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Parse error for [`MessageStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message status {0:?}")]
pub struct UnknownStatus(pub String);
