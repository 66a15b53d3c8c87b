// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::Envelope;
use crate::subject::{Subject, SubjectPattern};

/// Error returned by a subscription handler.
///
/// Any error fails the claimed message: it moves to `failed/` with this
/// text as the dead-letter reason.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl From<String> for SubscriberError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for SubscriberError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// An in-process message handler.
///
/// Handlers run on the execution context that claimed the message; they
/// may suspend freely but share the single claim with every other
/// matching handler.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle one claimed envelope.
    ///
    /// # Errors
    ///
    /// Any error fails the message for every handler that shared the
    /// claim.
    async fn handle(&self, envelope: &Envelope) -> Result<(), SubscriberError>;
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    token: SubscriptionToken,
    pattern: SubjectPattern,
    handler: Arc<dyn Subscriber>,
}

/// In-memory table of subject-pattern subscriptions.
///
/// The table sits behind a reader-writer lock; lookups clone the handler
/// Arcs out so invocation never holds the lock. Handlers are returned in
/// registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
    next_token: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every subject matching `pattern`.
    pub fn subscribe(
        &self,
        pattern: SubjectPattern,
        handler: Arc<dyn Subscriber>,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            token,
            pattern,
            handler,
        });
        token
    }

    /// Drop a subscription; returns whether the token was known.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.token != token);
        subscriptions.len() != before
    }

    /// Handlers whose pattern matches `subject`, in registration order.
    pub fn subscribers_for(&self, subject: &Subject) -> Vec<Arc<dyn Subscriber>> {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.pattern.matches(subject))
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether no subscriptions exist.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber {
        calls: AtomicUsize,
        label: usize,
        order: Arc<parking_lot::Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Subscriber for CountingSubscriber {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), SubscriberError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(self.label);
            Ok(())
        }
    }

    fn subscriber(label: usize, order: &Arc<parking_lot::Mutex<Vec<usize>>>) -> Arc<CountingSubscriber> {
        Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
            label,
            order: Arc::clone(order),
        })
    }

    fn pattern(p: &str) -> SubjectPattern {
        SubjectPattern::new(p).unwrap()
    }

    fn subject(s: &str) -> Subject {
        Subject::new(s).unwrap()
    }

    #[test]
    fn test_subscribers_match_by_pattern() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        registry.subscribe(pattern("relay.agent.>"), subscriber(0, &order));
        registry.subscribe(pattern("relay.agent.alpha"), subscriber(1, &order));
        registry.subscribe(pattern("other.>"), subscriber(2, &order));

        let matched = registry.subscribers_for(&subject("relay.agent.alpha"));
        assert_eq!(matched.len(), 2);

        let matched = registry.subscribers_for(&subject("other.thing"));
        assert_eq!(matched.len(), 1);

        let matched = registry.subscribers_for(&subject("nothing.here"));
        assert!(matched.is_empty());
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = subscriber(1, &order);
        let second = subscriber(2, &order);
        registry.subscribe(pattern("a.>"), first);
        registry.subscribe(pattern("a.*"), second);

        let matched = registry.subscribers_for(&subject("a.b"));
        assert_eq!(matched.len(), 2);
        // Invoke in returned order and observe labels.
        tokio_test::block_on(async {
            for handler in matched {
                handler
                    .handle(&crate::message::Envelope::new(
                        subject("a.b"),
                        subject("x.y"),
                        serde_json::json!({}),
                        crate::message::Budget::new(1, chrono::Utc::now(), 1),
                    ))
                    .await
                    .unwrap();
            }
        });
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let token = registry.subscribe(pattern("a.b"), subscriber(0, &order));
        assert_eq!(registry.len(), 1);

        assert!(registry.unsubscribe(token));
        assert!(registry.is_empty());
        assert!(!registry.unsubscribe(token));
    }
}
