// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// Layer 3: Internal module imports
// (none)

/// Default buffer depth for the broadcast channel behind an emitter.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// The kinds of ephemeral signals the bus emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// A party is composing a message.
    Typing,
    /// Liveness announcement.
    Presence,
    /// A consumer read a message.
    ReadReceipt,
    /// The bus accepted a message for an endpoint.
    DeliveryReceipt,
    /// Long-running work progress.
    Progress,
    /// Mailbox admission pressure.
    Backpressure,
}

impl Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Typing => "typing",
            Self::Presence => "presence",
            Self::ReadReceipt => "read_receipt",
            Self::DeliveryReceipt => "delivery_receipt",
            Self::Progress => "progress",
            Self::Backpressure => "backpressure",
        };
        f.write_str(name)
    }
}

/// Severity-like state carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    /// Activity started.
    Started,
    /// Activity stopped or cleared.
    Stopped,
    /// Approaching a limit.
    Warning,
    /// At or over a limit.
    Critical,
}

/// One ephemeral signal on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Signal kind.
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    /// Signal state.
    pub state: SignalState,
    /// Endpoint subject the signal concerns.
    pub endpoint_subject: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Free-form attachment.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Signal {
    /// Build a signal stamped with the current time.
    pub fn now(
        signal_type: SignalType,
        state: SignalState,
        endpoint_subject: impl Into<String>,
    ) -> Self {
        Self {
            signal_type,
            state,
            endpoint_subject: endpoint_subject.into(),
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    /// Builder method: attach free-form data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Anything that accepts signals.
///
/// The bus and Mesh emit through this seam so observers (SSE bridges,
/// tests) can be swapped in, and a missing sink is simply no signals.
pub trait SignalSink: Send + Sync {
    /// Emit one signal. Must not block and must not fail the caller.
    fn emit(&self, signal: Signal);
}

/// Broadcast fan-out of signals to in-process listeners.
///
/// Emission never blocks and never fails: with no subscribers the signal
/// is dropped on the floor, and a slow subscriber loses the oldest
/// buffered signals rather than exerting backpressure.
pub struct SignalEmitter {
    tx: broadcast::Sender<Signal>,
}

impl SignalEmitter {
    /// Create an emitter with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach a listener. Each listener sees every signal emitted after
    /// it subscribed, subject to the buffer capacity.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SignalEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

impl SignalSink for SignalEmitter {
    fn emit(&self, signal: Signal) {
        // A send error just means nobody is listening.
        let _ = self.tx.send(signal);
    }
}
