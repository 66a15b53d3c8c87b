// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Failures in adapter loading, lifecycle, and delivery.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// `start` failed; the previous instance (if any) stays live.
    #[error("adapter {id} failed to start: {reason}")]
    StartFailed {
        /// Adapter id.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// `stop` failed; logged, never propagated past the registry.
    #[error("adapter {id} failed to stop: {reason}")]
    StopFailed {
        /// Adapter id.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// Outbound delivery failed; isolated from the Maildir write.
    #[error("adapter {id} delivery failed: {reason}")]
    DeliveryFailed {
        /// Adapter id.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// The instantiated adapter is missing a required member.
    #[error("adapter {id} has invalid shape: {detail}")]
    InvalidShape {
        /// Adapter id (or config entry id when the instance has none).
        id: String,
        /// Which member failed validation.
        detail: String,
    },

    /// No built-in factory is registered under this type.
    #[error("unknown builtin adapter type {type_name:?}")]
    UnknownType {
        /// The unresolvable `type` value.
        type_name: String,
    },

    /// A plugin source was configured but no external loader is wired.
    #[error("adapter {id} needs a plugin loader, none is configured")]
    NoExternalLoader {
        /// Adapter id.
        id: String,
    },

    /// The adapter's `config` value did not parse.
    #[error("adapter {id} config invalid: {source}")]
    Config {
        /// Adapter id.
        id: String,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
}
