//! # dork-relay - durable agent message bus
//!
//! A durable, at-least-once message bus whose endpoints are
//! Maildir-style directories. Publish/subscribe with wildcard subject
//! routing, per-endpoint reliability (backpressure, circuit breaking,
//! rate limiting), budget-enforced hop/TTL/call limits bounding
//! agent-to-agent fan-out, a dead-letter queue, ephemeral signals, and
//! pluggable external channel adapters behind access-control rules.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dork_relay::config::RelayConfig;
//! use dork_relay::core::RelayCore;
//! use dork_relay::message::{Budget, Envelope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = RelayCore::open(RelayConfig::new("/var/lib/relay")).await?;
//!
//!     // Endpoints own mailboxes; Mesh registers one per agent.
//!     let subject = "relay.agent.alpha.worker".parse()?;
//!     core.register_endpoint(&subject).await?;
//!
//!     // In-process consumers subscribe by pattern.
//!     core.subscribe("relay.agent.alpha.>".parse()?, Arc::new(MyHandler));
//!
//!     // Producers publish envelopes with fan-out budgets.
//!     let receipt = core.publish(my_envelope()).await?;
//!     println!("delivered to {:?}", receipt.delivered_to);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`subject`] - dot-segmented subjects, `*`/`>` wildcard patterns
//! - [`message`] - envelopes, budgets, budget enforcement
//! - [`store`] - Maildir mailboxes and the dead-letter queue
//! - [`index`] - SQLite mirror backing list/count/metrics
//! - [`subscription`] - in-process handler table
//! - [`signal`] - ephemeral typing/progress/backpressure fan-out
//! - [`reliability`] - circuit breakers, rate limits, backpressure knobs
//! - [`access`] - priority-ordered allow/deny rules
//! - [`adapter`] - external channel adapters and their loader
//! - [`pipeline`] - the staged per-endpoint delivery path
//! - [`core`] - the orchestrator and its narrow seams
//!
//! # Guarantees
//!
//! Per endpoint, publish order is preserved through delivery (serialised
//! mailbox writes plus ULID filename order); across endpoints there is
//! no ordering. Acceptance is durable: once a receipt lists an endpoint,
//! the envelope sits in exactly one of `new/`, `cur/`, or `failed/`
//! across restarts. Signals are fire-and-forget and never persisted.

pub mod access;
pub mod adapter;
pub mod config;
pub mod core;
pub mod index;
pub mod message;
pub mod pipeline;
pub mod reliability;
pub mod signal;
pub mod store;
pub mod subject;
pub mod subscription;

// Re-export commonly used types
pub use access::{AccessControl, AccessRule, AccessRules, RuleAction};
pub use adapter::{AdapterCatalog, AdapterRegistry, ChannelAdapter};
pub use config::RelayConfig;
pub use self::core::{
    endpoint_hash, CoreError, Endpoint, EndpointRegistrar, PublishError, PublishReceipt,
    Publisher, RejectedDelivery, RelayCore,
};
pub use index::{IndexMetrics, MessageRow, SqliteIndex};
pub use message::{enforce_budget, Budget, BudgetRejection, Envelope, MessageId, MessageStatus};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline, DeliveryRejection};
pub use reliability::{
    BackpressureConfig, CircuitBreakerConfig, CircuitBreakerManager, RateLimitConfig, RateLimiter,
    ReliabilityConfig,
};
pub use signal::{Signal, SignalEmitter, SignalSink, SignalState, SignalType};
pub use store::{DeadLetter, DeadLetterQueue, MaildirStore, StoreError};
pub use subject::{Subject, SubjectError, SubjectPattern};
pub use subscription::{Subscriber, SubscriberError, SubscriptionRegistry, SubscriptionToken};
