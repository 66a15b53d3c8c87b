//! Ephemeral signals: typing, presence, receipts, progress, backpressure.
//!
//! Signals are fire-and-forget. They are never persisted, never retried,
//! carry no ordering guarantee relative to message delivery, and vanish
//! silently when nobody is listening.

mod emitter;

pub use emitter::{
    Signal, SignalEmitter, SignalSink, SignalState, SignalType, DEFAULT_SIGNAL_CAPACITY,
};
