// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::endpoint::{endpoint_hash, Endpoint};
use super::error::{CoreError, PublishError};
use super::traits::{EndpointRegistrar, PublishReceipt, Publisher, RejectedDelivery};
use crate::access::{AccessControl, AccessRule, AccessRules};
use crate::adapter::{AdapterCatalog, AdapterError, AdapterInfo, AdapterRegistry, ChannelAdapter, LoadReport};
use crate::config::RelayConfig;
use crate::index::{IndexMetrics, MessageRow, SqliteIndex};
use crate::message::{Envelope, MessageId};
use crate::pipeline::DeliveryPipeline;
use crate::reliability::{CircuitBreakerManager, RateLimiter, ReliabilityConfig};
use crate::signal::{SignalEmitter, SignalSink};
use crate::store::{DeadLetter, DeadLetterQueue, MaildirStore};
use crate::subject::{Subject, SubjectPattern};
use crate::subscription::{Subscriber, SubscriptionRegistry, SubscriptionToken};

struct CoreInner {
    config: RelayConfig,
    endpoints: DashMap<String, Endpoint>,
    store: Arc<MaildirStore>,
    index: Arc<SqliteIndex>,
    subscriptions: Arc<SubscriptionRegistry>,
    signals: Arc<SignalEmitter>,
    breakers: Arc<CircuitBreakerManager>,
    limiter: Arc<RateLimiter>,
    access: Arc<AccessControl>,
    dlq: Arc<DeadLetterQueue>,
    adapters: Arc<AdapterRegistry>,
    pipeline: DeliveryPipeline,
    reliability: Arc<RwLock<ReliabilityConfig>>,
}

/// The bus orchestrator.
///
/// Owns the Maildir tree, the message index, subscriptions, signals,
/// reliability state, access rules, and channel adapters; one instance
/// per process owns its root and database exclusively. Cheap to clone -
/// clones share the same state.
///
/// # Example
/// ```rust,ignore
/// use dork_relay::config::RelayConfig;
/// use dork_relay::core::RelayCore;
///
/// let core = RelayCore::open(RelayConfig::new("/var/lib/relay")).await?;
/// let endpoint = core.register_endpoint(&"relay.agent.alpha".parse()?).await?;
/// let receipt = core.publish(envelope).await?;
/// ```
#[derive(Clone)]
pub struct RelayCore {
    inner: Arc<CoreInner>,
}

impl RelayCore {
    /// Open the bus: prepare the root, open and migrate the index, load
    /// persisted access rules, and reclaim orphaned claims from every
    /// mailbox on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on invalid config or store/index failures.
    pub async fn open(config: RelayConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::Config)?;

        tokio::fs::create_dir_all(&config.root)
            .await
            .map_err(|e| crate::store::StoreError::io("create_dir", &config.root, e))?;

        let index = Arc::new(SqliteIndex::open(&config.index_path())?);
        let store = Arc::new(MaildirStore::new(&config.root));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let signals = Arc::new(SignalEmitter::new(config.signal_capacity));
        let reliability = Arc::new(RwLock::new(config.reliability.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new(
            config.reliability.circuit_breaker.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(config.reliability.rate_limit.clone()));
        let access = Arc::new(AccessControl::load(Arc::clone(&index))?);
        let dlq = Arc::new(DeadLetterQueue::new(Arc::clone(&store), Arc::clone(&index)));
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&subscriptions),
            Arc::clone(&breakers),
            Arc::clone(&dlq),
            Arc::clone(&signals) as Arc<dyn SignalSink>,
            Arc::clone(&reliability),
        );

        let core = Self {
            inner: Arc::new(CoreInner {
                config,
                endpoints: DashMap::new(),
                store,
                index,
                subscriptions,
                signals,
                breakers,
                limiter,
                access,
                dlq,
                adapters: Arc::new(AdapterRegistry::new()),
                pipeline,
                reliability,
            }),
        };
        core.recover().await?;
        Ok(core)
    }

    /// Reclaim orphaned `cur/` entries in every mailbox on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on filesystem failure.
    pub async fn recover(&self) -> Result<u32, CoreError> {
        let mut reclaimed = 0;
        for hash in self.inner.store.list_mailboxes().await? {
            reclaimed += self.inner.store.recover(&hash).await?;
        }
        if reclaimed > 0 {
            info!(reclaimed, "reclaimed in-flight messages from previous run");
        }
        Ok(reclaimed)
    }

    /// Publish with a caller-supplied cancellation context. Cancellation
    /// observed before a mailbox write commits discards that delivery
    /// silently; deliveries already committed are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] for validation, rate-limit, or
    /// whole-publish cancellation; per-endpoint failures land in the
    /// receipt.
    pub async fn publish_with_cancellation(
        &self,
        mut envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, PublishError> {
        envelope.validate()?;
        let message_id = *envelope.id.get_or_insert_with(MessageId::new);
        if envelope.created_at.is_none() {
            envelope.created_at = Some(Utc::now());
        }
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        self.inner
            .limiter
            .check_and_record(envelope.from.as_str())?;
        if let Err(e) = self
            .inner
            .index
            .record_sender_usage(envelope.from.as_str(), Utc::now())
        {
            warn!(error = %e, "sender usage counter not recorded");
        }

        // Candidates: registered endpoints owning this subject, filtered
        // by access control. A refusal at one endpoint never blocks the
        // others.
        let candidates: Vec<Endpoint> = self
            .inner
            .endpoints
            .iter()
            .filter(|entry| entry.value().subject == envelope.subject)
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered_to = Vec::new();
        let mut rejected = Vec::new();
        for endpoint in candidates {
            if !self
                .inner
                .access
                .is_allowed(&envelope.from, &endpoint.subject)
            {
                debug!(from = %envelope.from, to = %endpoint.subject, "delivery denied by access rules");
                rejected.push(RejectedDelivery {
                    subject: endpoint.subject.to_string(),
                    reason: "access_denied".to_string(),
                });
                continue;
            }
            match self
                .inner
                .pipeline
                .deliver_to_endpoint(&endpoint, &envelope, cancel)
                .await
            {
                Ok(outcome) if outcome.delivered => {
                    delivered_to.push(endpoint.subject.to_string());
                }
                Ok(outcome) => {
                    let reason = outcome
                        .rejected
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "rejected".to_string());
                    rejected.push(RejectedDelivery {
                        subject: endpoint.subject.to_string(),
                        reason,
                    });
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.subject, error = %e, "delivery pipeline failed");
                    rejected.push(RejectedDelivery {
                        subject: endpoint.subject.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Forward to external channels; adapter failures are isolated
        // and never roll back mailbox writes.
        let forwarded_to_adapter = match self
            .inner
            .adapters
            .deliver(&envelope.subject, &envelope)
            .await
        {
            Ok(forwarded) => forwarded,
            Err(e) => {
                warn!(subject = %envelope.subject, error = %e, "adapter delivery failed");
                false
            }
        };

        Ok(PublishReceipt {
            message_id,
            delivered_to,
            rejected,
            forwarded_to_adapter,
        })
    }

    /// Register an in-process handler for every subject matching
    /// `pattern`; returns the token for `unsubscribe`.
    pub fn subscribe(
        &self,
        pattern: SubjectPattern,
        handler: Arc<dyn Subscriber>,
    ) -> SubscriptionToken {
        self.inner.subscriptions.subscribe(pattern, handler)
    }

    /// Drop a subscription; returns whether the token was known.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.subscriptions.unsubscribe(token)
    }

    /// All registered endpoints.
    pub fn list_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .inner
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        endpoints.sort_by(|a, b| a.subject.cmp(&b.subject));
        endpoints
    }

    /// Look up one endpoint by subject.
    pub fn get_endpoint(&self, subject: &Subject) -> Option<Endpoint> {
        self.inner
            .endpoints
            .get(subject.as_str())
            .map(|entry| entry.value().clone())
    }

    /// Replace the whole access-rule table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] when persistence fails.
    pub fn set_access_rules(&self, rules: Vec<AccessRule>) -> Result<(), CoreError> {
        self.inner.access.set_rules(rules)?;
        Ok(())
    }

    /// Append one access rule.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] when persistence fails.
    pub fn add_access_rule(&self, rule: AccessRule) -> Result<(), CoreError> {
        self.inner.access.add_rule(rule)?;
        Ok(())
    }

    /// The access-rule table, for composition by Mesh and admin
    /// surfaces.
    pub fn access(&self) -> Arc<dyn AccessRules> {
        Arc::clone(&self.inner.access) as Arc<dyn AccessRules>
    }

    /// Atomically swap the reliability knobs: backpressure takes effect
    /// on the next admission, breaker and rate tuning immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] when the new values are invalid;
    /// the old configuration stays in force.
    pub fn reload_config(&self, reliability: ReliabilityConfig) -> Result<(), CoreError> {
        reliability.validate().map_err(CoreError::Config)?;
        self.inner
            .breakers
            .update_config(reliability.circuit_breaker.clone());
        self.inner
            .limiter
            .update_config(reliability.rate_limit.clone());
        *self.inner.reliability.write() = reliability;
        info!("reliability config reloaded");
        Ok(())
    }

    /// Start and register (or hot-swap) one adapter.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] from the failed start; a previous
    /// instance under the same id stays live.
    pub async fn register_adapter(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<(), AdapterError> {
        let publisher: Arc<dyn Publisher> = Arc::new(self.clone());
        self.inner.adapters.register(adapter, publisher).await
    }

    /// Load every enabled adapter entry from the configuration through
    /// a catalog. Per-entry failures are reported, never fatal.
    pub async fn load_adapters(&self, catalog: &AdapterCatalog) -> LoadReport {
        let publisher: Arc<dyn Publisher> = Arc::new(self.clone());
        catalog
            .load_all(&self.inner.config.adapters, &self.inner.adapters, publisher)
            .await
    }

    /// Listing of registered adapters with status.
    pub fn list_adapters(&self) -> Vec<AdapterInfo> {
        self.inner.adapters.list()
    }

    /// Dead letters, optionally for one endpoint hash.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on filesystem failure.
    pub async fn list_dead(&self, endpoint_hash: Option<&str>) -> Result<Vec<DeadLetter>, CoreError> {
        Ok(self.inner.dlq.list_dead(endpoint_hash).await?)
    }

    /// Purge dead letters older than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on filesystem failure.
    pub async fn purge_dead(
        &self,
        max_age: Duration,
        endpoint_hash: Option<&str>,
    ) -> Result<u64, CoreError> {
        Ok(self.inner.dlq.purge(max_age, endpoint_hash).await?)
    }

    /// Aggregate message counts from the index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on index failure.
    pub fn metrics(&self) -> Result<IndexMetrics, CoreError> {
        Ok(self.inner.index.get_metrics()?)
    }

    /// Page through indexed messages for one subject in delivery order.
    /// `cursor` is the last id of the previous page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on index failure.
    pub fn list_messages(
        &self,
        subject: &Subject,
        cursor: Option<&MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, CoreError> {
        Ok(self
            .inner
            .index
            .list_by_subject(subject.as_str(), cursor, limit)?)
    }

    /// The signal fan-out, for SSE-style observers.
    pub fn signals(&self) -> Arc<SignalEmitter> {
        Arc::clone(&self.inner.signals)
    }

    /// Stop all adapters. Mailboxes and the index need no teardown.
    pub async fn shutdown(&self) {
        self.inner.adapters.shutdown().await;
    }
}

#[async_trait]
impl Publisher for RelayCore {
    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt, PublishError> {
        self.publish_with_cancellation(envelope, &CancellationToken::new())
            .await
    }
}

#[async_trait]
impl EndpointRegistrar for RelayCore {
    async fn register_endpoint(&self, subject: &Subject) -> Result<Endpoint, CoreError> {
        if let Some(existing) = self.get_endpoint(subject) {
            return Ok(existing);
        }
        let hash = endpoint_hash(subject);
        let maildir_path = self.inner.store.ensure_maildir(&hash).await?;
        self.inner.store.recover(&hash).await?;
        let endpoint = Endpoint {
            subject: subject.clone(),
            hash,
            maildir_path,
        };
        self.inner
            .endpoints
            .insert(subject.as_str().to_string(), endpoint.clone());
        info!(subject = %subject, hash = %endpoint.hash, "endpoint registered");
        Ok(endpoint)
    }

    async fn unregister_endpoint(&self, subject: &Subject) -> Result<(), CoreError> {
        let Some((_, endpoint)) = self.inner.endpoints.remove(subject.as_str()) else {
            return Err(CoreError::EndpointNotFound {
                subject: subject.clone(),
            });
        };
        self.inner.breakers.forget(&endpoint.hash);
        info!(subject = %subject, "endpoint unregistered; mailbox kept on disk");
        Ok(())
    }
}
