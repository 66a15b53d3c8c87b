//! In-process subscription handlers keyed by subject pattern.

mod registry;

pub use registry::{Subscriber, SubscriberError, SubscriptionRegistry, SubscriptionToken};
