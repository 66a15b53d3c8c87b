// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::error::AdapterError;
use crate::core::Publisher;
use crate::message::Envelope;
use crate::subject::Subject;

/// Lifecycle state reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Not started or cleanly stopped.
    Stopped,
    /// Started and accepting deliveries.
    Running,
    /// Start or transport failure; not accepting deliveries.
    Failed,
}

/// Status snapshot returned by [`ChannelAdapter::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatus {
    /// Current lifecycle state.
    pub state: AdapterState,
    /// Optional human-readable detail (last error, connection info).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AdapterStatus {
    /// A plain status with no detail.
    pub fn of(state: AdapterState) -> Self {
        Self {
            state,
            detail: None,
        }
    }
}

/// Descriptive metadata an adapter may expose for UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterManifest {
    /// Adapter id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An external channel the bus can forward envelopes onto.
///
/// Adapters own one subject-prefix slice of the routing space: the
/// registry forwards an envelope to the adapter whose `subject_prefix`
/// prefixes the envelope subject. Inbound traffic flows the other way
/// through the [`Publisher`] handed to `start`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable adapter id; doubles as the registry key.
    fn id(&self) -> &str;

    /// Subject prefix this adapter transports (e.g. `telegram.`).
    fn subject_prefix(&self) -> &str;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Bring the transport up. The publisher is how inbound external
    /// traffic enters the bus.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::StartFailed`]; the registry keeps any
    /// previous instance live in that case.
    async fn start(&self, publisher: Arc<dyn Publisher>) -> Result<(), AdapterError>;

    /// Tear the transport down. Errors are logged by the registry, not
    /// propagated.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::StopFailed`].
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Carry one envelope out onto the external transport.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::DeliveryFailed`]; adapter failures never
    /// roll back the Maildir write that preceded them.
    async fn deliver(&self, subject: &Subject, envelope: &Envelope) -> Result<(), AdapterError>;

    /// Current lifecycle status.
    fn status(&self) -> AdapterStatus;

    /// Optional descriptive metadata; the registry synthesises a
    /// minimal manifest when absent.
    fn manifest(&self) -> Option<AdapterManifest> {
        None
    }
}
