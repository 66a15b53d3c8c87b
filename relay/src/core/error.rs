// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::access::AccessError;
use crate::index::IndexError;
use crate::message::EnvelopeError;
use crate::reliability::RateLimited;
use crate::store::StoreError;
use crate::subject::Subject;

/// Failures constructing or administering the bus.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Maildir store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message index failure.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Access-rule store failure.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Invalid configuration value.
    #[error("invalid relay config: {0}")]
    Config(String),

    /// The subject has no registered endpoint.
    #[error("no endpoint registered for {subject}")]
    EndpointNotFound {
        /// The unresolved subject.
        subject: Subject,
    },
}

/// Why a publish was refused at the door.
///
/// Per-endpoint rejections do not surface here - they are collected
/// into the receipt so one bad endpoint never blocks its siblings.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Malformed envelope; nothing was written anywhere.
    #[error("invalid envelope: {0}")]
    Validation(String),

    /// The sender's rate window is full; retriable later.
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    /// The caller's cancellation fired before any endpoint committed.
    #[error("publish cancelled")]
    Cancelled,
}

impl From<EnvelopeError> for PublishError {
    fn from(e: EnvelopeError) -> Self {
        Self::Validation(e.to_string())
    }
}
