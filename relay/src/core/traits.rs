// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::Serialize;

// Layer 3: Internal module imports
use super::endpoint::Endpoint;
use super::error::{CoreError, PublishError};
use crate::message::{Envelope, MessageId};
use crate::subject::Subject;

/// One endpoint's refusal, collected into the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedDelivery {
    /// The endpoint subject that refused.
    pub subject: String,
    /// Stable reason text (`backpressure`, `circuit_open`,
    /// `access_denied`, budget reasons, ...).
    pub reason: String,
}

/// What a publish accomplished.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// The id stamped on (or carried by) the envelope.
    pub message_id: MessageId,
    /// Endpoints that accepted the envelope into their mailbox.
    pub delivered_to: Vec<String>,
    /// Endpoints that refused, with reasons.
    pub rejected: Vec<RejectedDelivery>,
    /// Whether a channel adapter carried the envelope outward.
    pub forwarded_to_adapter: bool,
}

/// The narrow publishing seam.
///
/// Handed to channel adapters for inbound traffic and to Mesh for
/// lifecycle signals; implemented by `RelayCore`. Consumers depend on
/// this trait, never on bus internals.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one envelope to every matching, permitted endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] for validation, rate-limit, or
    /// cancellation refusals; per-endpoint failures land in the receipt.
    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt, PublishError>;
}

/// The narrow endpoint-lifecycle seam.
///
/// Mesh registers every discovered agent as an endpoint through this
/// trait; implemented by `RelayCore`.
#[async_trait]
pub trait EndpointRegistrar: Send + Sync {
    /// Idempotently register a subject and create its mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] when the mailbox cannot be prepared.
    async fn register_endpoint(&self, subject: &Subject) -> Result<Endpoint, CoreError>;

    /// Remove the in-memory endpoint record. The mailbox directory
    /// persists on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EndpointNotFound`] for unknown subjects.
    async fn unregister_endpoint(&self, subject: &Subject) -> Result<(), CoreError>;
}
