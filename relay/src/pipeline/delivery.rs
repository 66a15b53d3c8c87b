// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::core::Endpoint;
use crate::index::{IndexError, MessageRow, SqliteIndex};
use crate::message::{enforce_budget, BudgetRejection, Envelope, MessageStatus};
use crate::reliability::{CircuitBreakerManager, ReliabilityConfig};
use crate::signal::{Signal, SignalSink, SignalState, SignalType};
use crate::store::{DeadLetterQueue, MaildirStore, StoreError};
use crate::subscription::SubscriptionRegistry;

/// Why the pipeline refused one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryRejection {
    /// The mailbox is at capacity; retriable later.
    Backpressure {
        /// Fill ratio observed at admission.
        pressure: f64,
    },

    /// The endpoint's breaker is open; retriable later.
    CircuitOpen,

    /// Budget enforcement refused; dead-lettered, not retried.
    BudgetExceeded(BudgetRejection),

    /// The Maildir write failed; dead-lettered, breaker notified.
    DeliveryFailed {
        /// The store error text.
        reason: String,
    },

    /// The caller's cancellation fired before the write committed; the
    /// envelope was discarded with no side effects.
    Cancelled,
}

impl Display for DeliveryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backpressure { .. } => f.write_str("backpressure"),
            Self::CircuitOpen => f.write_str("circuit_open"),
            Self::BudgetExceeded(rejection) => write!(f, "{rejection}"),
            Self::DeliveryFailed { reason } => write!(f, "delivery failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What one endpoint delivery accomplished.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// Whether the envelope landed in the mailbox.
    pub delivered: bool,
    /// The refusal, when `delivered` is false.
    pub rejected: Option<DeliveryRejection>,
    /// Mailbox fill ratio observed at admission.
    pub pressure: f64,
}

impl DeliveryOutcome {
    fn rejected(rejection: DeliveryRejection, pressure: f64) -> Self {
        Self {
            delivered: false,
            rejected: Some(rejection),
            pressure,
        }
    }
}

/// Unexpected infrastructure failure inside the pipeline.
///
/// Distinct from [`DeliveryRejection`]: rejections are the pipeline
/// doing its job, these are the pipeline unable to do it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Maildir failure outside the delivery write itself.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Index failure.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// The staged admission-and-delivery path for one endpoint.
///
/// Stages, in order: backpressure, circuit breaker, budget, Maildir
/// write, index insert, synchronous subscriber dispatch. Budget refusals
/// and failed writes land in the dead-letter queue; breaker bookkeeping
/// happens at the write and at handler outcomes.
pub struct DeliveryPipeline {
    store: Arc<MaildirStore>,
    index: Arc<SqliteIndex>,
    subscriptions: Arc<SubscriptionRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    dlq: Arc<DeadLetterQueue>,
    signals: Arc<dyn SignalSink>,
    config: Arc<RwLock<ReliabilityConfig>>,
}

impl DeliveryPipeline {
    /// Wire the pipeline to its collaborators.
    pub fn new(
        store: Arc<MaildirStore>,
        index: Arc<SqliteIndex>,
        subscriptions: Arc<SubscriptionRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        dlq: Arc<DeadLetterQueue>,
        signals: Arc<dyn SignalSink>,
        config: Arc<RwLock<ReliabilityConfig>>,
    ) -> Self {
        Self {
            store,
            index,
            subscriptions,
            breakers,
            dlq,
            signals,
            config,
        }
    }

    /// Run one envelope through the stages for one endpoint.
    ///
    /// The envelope must carry an id. A refusal is an `Ok` outcome; an
    /// `Err` means the pipeline itself hit broken infrastructure.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on store/index failures outside the
    /// guarded delivery write.
    pub async fn deliver_to_endpoint(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, PipelineError> {
        let backpressure = self.config.read().backpressure.clone();

        // Stage 1: mailbox admission.
        let count = self.index.count_new_by_endpoint(&endpoint.hash)?;
        let pressure = count as f64 / backpressure.max_mailbox_size as f64;
        if count >= backpressure.max_mailbox_size {
            self.emit_backpressure(endpoint, SignalState::Critical, pressure);
            return Ok(DeliveryOutcome::rejected(
                DeliveryRejection::Backpressure { pressure },
                pressure,
            ));
        }
        if pressure >= backpressure.pressure_warning_at {
            self.emit_backpressure(endpoint, SignalState::Warning, pressure);
        }

        // Stage 2: circuit breaker.
        if !self.breakers.check(&endpoint.hash) {
            return Ok(DeliveryOutcome::rejected(
                DeliveryRejection::CircuitOpen,
                pressure,
            ));
        }

        // Stage 3: budget enforcement.
        let updated_budget = match enforce_budget(envelope, &endpoint.subject, Utc::now()) {
            Ok(budget) => budget,
            Err(rejection) => {
                self.dlq
                    .reject(&endpoint.hash, envelope, &rejection.to_string())
                    .await?;
                return Ok(DeliveryOutcome::rejected(
                    DeliveryRejection::BudgetExceeded(rejection),
                    pressure,
                ));
            }
        };

        // Cancellation can still discard the envelope; once the write
        // below commits it cannot.
        if cancel.is_cancelled() {
            return Ok(DeliveryOutcome::rejected(
                DeliveryRejection::Cancelled,
                pressure,
            ));
        }

        // Stage 4: Maildir write.
        let mut accepted = envelope.clone();
        accepted.budget = updated_budget;
        let id = match self.store.deliver(&endpoint.hash, &accepted).await {
            Ok(id) => {
                self.breakers.record_success(&endpoint.hash);
                id
            }
            Err(e) => {
                self.breakers.record_failure(&endpoint.hash);
                let reason = format!("delivery failed: {e}");
                if let Err(dlq_err) = self.dlq.reject(&endpoint.hash, envelope, &reason).await {
                    warn!(endpoint = %endpoint.subject, error = %dlq_err,
                        "failed delivery could not be dead-lettered");
                }
                return Ok(DeliveryOutcome::rejected(
                    DeliveryRejection::DeliveryFailed {
                        reason: e.to_string(),
                    },
                    pressure,
                ));
            }
        };

        // Stage 5: index.
        self.index.insert_message(&MessageRow {
            id,
            subject: endpoint.subject.to_string(),
            endpoint_hash: endpoint.hash.clone(),
            status: MessageStatus::Pending,
            created_at: accepted.created_at.unwrap_or_else(Utc::now),
            expires_at: accepted.expires_at(),
        })?;

        // Stage 6: synchronous dispatch to in-process subscribers. With
        // no subscribers the message stays in new/ for a later claim.
        let handlers = self.subscriptions.subscribers_for(&endpoint.subject);
        if !handlers.is_empty() {
            let claimed = self.store.claim(&endpoint.hash, id).await?;
            let results = join_all(handlers.iter().map(|h| h.handle(&claimed))).await;
            let first_error = results.into_iter().find_map(Result::err);
            match first_error {
                None => {
                    self.store.complete(&endpoint.hash, id).await?;
                    self.index.update_status(&id, MessageStatus::Delivered)?;
                    debug!(%id, endpoint = %endpoint.subject, "handled and completed");
                }
                Some(error) => {
                    self.store
                        .fail(&endpoint.hash, id, &error.to_string())
                        .await?;
                    self.index.update_status(&id, MessageStatus::Failed)?;
                    self.breakers.record_failure(&endpoint.hash);
                    warn!(%id, endpoint = %endpoint.subject, %error, "handler failed");
                }
            }
        }

        Ok(DeliveryOutcome {
            delivered: true,
            rejected: None,
            pressure,
        })
    }

    fn emit_backpressure(&self, endpoint: &Endpoint, state: SignalState, pressure: f64) {
        self.signals.emit(
            Signal::now(
                SignalType::Backpressure,
                state,
                endpoint.subject.as_str(),
            )
            .with_data(serde_json::json!({ "pressure": pressure })),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::endpoint_hash;
    use crate::message::{Budget, MessageId};
    use crate::signal::SignalEmitter;
    use crate::subject::Subject;
    use crate::subscription::{Subscriber, SubscriberError};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<MaildirStore>,
        index: Arc<SqliteIndex>,
        subscriptions: Arc<SubscriptionRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        signals: Arc<SignalEmitter>,
        pipeline: DeliveryPipeline,
        endpoint: Endpoint,
    }

    async fn fixture() -> Fixture {
        fixture_with(ReliabilityConfig::default()).await
    }

    async fn fixture_with(config: ReliabilityConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MaildirStore::new(dir.path()));
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone()));
        let dlq = Arc::new(DeadLetterQueue::new(Arc::clone(&store), Arc::clone(&index)));
        let signals = Arc::new(SignalEmitter::default());
        let shared = Arc::new(RwLock::new(config));
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&subscriptions),
            Arc::clone(&breakers),
            dlq,
            signals.clone() as Arc<dyn SignalSink>,
            shared,
        );

        let subject = Subject::new("relay.agent.alpha").unwrap();
        let hash = endpoint_hash(&subject);
        store.ensure_maildir(&hash).await.unwrap();
        let endpoint = Endpoint {
            maildir_path: store.mailbox_path(&hash),
            subject,
            hash,
        };
        Fixture {
            _dir: dir,
            store,
            index,
            subscriptions,
            breakers,
            signals,
            pipeline,
            endpoint,
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(
            Subject::new("relay.agent.alpha").unwrap(),
            Subject::new("x").unwrap(),
            json!({"n": 1}),
            Budget::new(3, Utc::now() + ChronoDuration::minutes(1), 5),
        )
        .with_id(MessageId::new())
        .with_created_at(Utc::now())
    }

    struct OkSubscriber;

    #[async_trait]
    impl Subscriber for OkSubscriber {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), SubscriberError> {
            Ok(())
        }
    }

    struct FailingSubscriber;

    #[async_trait]
    impl Subscriber for FailingSubscriber {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), SubscriberError> {
            Err(SubscriberError::from("handler exploded"))
        }
    }

    #[tokio::test]
    async fn test_baseline_delivery_lands_in_new_and_index() {
        let f = fixture().await;
        let envelope = envelope();
        let id = envelope.id.unwrap();
        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.delivered);
        assert!(outcome.rejected.is_none());
        let path = f
            .store
            .mailbox_path(&f.endpoint.hash)
            .join("new")
            .join(format!("{id}.json"));
        assert!(path.is_file());
        let row = f.index.get_message(&id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn test_budget_is_stamped_on_delivered_file() {
        let f = fixture().await;
        let envelope = envelope();
        let id = envelope.id.unwrap();
        f.pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &CancellationToken::new())
            .await
            .unwrap();

        let written = f.store.read_envelope(&f.endpoint.hash, id).await.unwrap();
        assert_eq!(written.budget.hop_count, 1);
        assert_eq!(written.budget.call_budget_remaining, 4);
        assert_eq!(written.budget.ancestor_chain, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_success_completes_message() {
        let f = fixture().await;
        f.subscriptions.subscribe(
            "relay.agent.alpha".parse().unwrap(),
            Arc::new(OkSubscriber),
        );
        let envelope = envelope();
        let id = envelope.id.unwrap();
        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.delivered);

        let mailbox = f.store.mailbox_path(&f.endpoint.hash);
        assert!(!mailbox.join("new").join(format!("{id}.json")).exists());
        assert!(!mailbox.join("cur").join(format!("{id}.json")).exists());
        assert!(!mailbox.join("failed").join(format!("{id}.json")).exists());
        let row = f.index.get_message(&id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_handler_failure_fails_message_and_breaker() {
        let f = fixture().await;
        f.subscriptions.subscribe(
            "relay.agent.alpha".parse().unwrap(),
            Arc::new(FailingSubscriber),
        );
        let envelope = envelope();
        let id = envelope.id.unwrap();
        f.pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &CancellationToken::new())
            .await
            .unwrap();

        let mailbox = f.store.mailbox_path(&f.endpoint.hash);
        assert!(mailbox.join("failed").join(format!("{id}.json")).is_file());
        let dead = f.store.read_dead_letter(&f.endpoint.hash, id).await.unwrap();
        assert!(dead.reason.contains("handler exploded"));
        let row = f.index.get_message(&id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_backpressure_critical_rejects_third_message() {
        let mut config = ReliabilityConfig::default();
        config.backpressure.max_mailbox_size = 2;
        config.backpressure.pressure_warning_at = 0.5;
        let f = fixture_with(config).await;
        let mut signals = f.signals.subscribe();

        for _ in 0..2 {
            let outcome = f
                .pipeline
                .deliver_to_endpoint(&f.endpoint, &envelope(), &CancellationToken::new())
                .await
                .unwrap();
            assert!(outcome.delivered);
        }
        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome.rejected,
            Some(DeliveryRejection::Backpressure { .. })
        ));

        // A warning fired at the second delivery, critical at the third.
        let mut states = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            assert_eq!(signal.signal_type, SignalType::Backpressure);
            states.push(signal.state);
        }
        assert!(states.contains(&SignalState::Warning));
        assert!(states.contains(&SignalState::Critical));
    }

    #[tokio::test]
    async fn test_expired_ttl_goes_to_dead_letters() {
        let f = fixture().await;
        let mut envelope = envelope();
        envelope.budget.ttl = (Utc::now() - ChronoDuration::seconds(1)).timestamp_millis();
        let id = envelope.id.unwrap();

        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome.rejected,
            Some(DeliveryRejection::BudgetExceeded(BudgetRejection::TtlExpired { .. }))
        ));

        let mailbox = f.store.mailbox_path(&f.endpoint.hash);
        assert!(!mailbox.join("new").join(format!("{id}.json")).exists());
        let dead = f.store.read_dead_letter(&f.endpoint.hash, id).await.unwrap();
        assert!(dead.reason.starts_with("ttl_expired"));
        let row = f.index.get_message(&id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects() {
        let f = fixture().await;
        for _ in 0..ReliabilityConfig::default().circuit_breaker.failure_threshold {
            f.breakers.record_failure(&f.endpoint.hash);
        }
        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.rejected, Some(DeliveryRejection::CircuitOpen));
    }

    #[tokio::test]
    async fn test_cancellation_before_write_discards_silently() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let envelope = envelope();
        let id = envelope.id.unwrap();

        let outcome = f
            .pipeline
            .deliver_to_endpoint(&f.endpoint, &envelope, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.rejected, Some(DeliveryRejection::Cancelled));

        // No file anywhere, no index row, no dead letter.
        let mailbox = f.store.mailbox_path(&f.endpoint.hash);
        assert!(!mailbox.join("new").join(format!("{id}.json")).exists());
        assert!(!mailbox.join("failed").join(format!("{id}.json")).exists());
        assert!(f.index.get_message(&id).unwrap().is_none());
    }
}
