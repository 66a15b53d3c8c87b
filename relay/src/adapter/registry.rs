// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};

// Layer 3: Internal module imports
use super::error::AdapterError;
use super::traits::{AdapterManifest, AdapterStatus, ChannelAdapter};
use crate::core::Publisher;
use crate::message::Envelope;
use crate::subject::Subject;

/// Listing entry for one registered adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Adapter id.
    pub id: String,
    /// Subject prefix it transports.
    pub subject_prefix: String,
    /// Manifest (synthesised when the adapter exposes none).
    pub manifest: AdapterManifest,
    /// Current status.
    pub status: AdapterStatus,
}

/// Running adapter instances keyed by id.
///
/// Hot-reload contract: `register` starts the replacement *before*
/// swapping it in - a failed start leaves the previous instance live -
/// and stops the old instance only after the swap, logging (never
/// propagating) stop errors.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start and register (or hot-swap) an adapter.
    ///
    /// # Errors
    ///
    /// Returns the start error untouched; registry state is unchanged
    /// when the new instance fails to come up.
    pub async fn register(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<(), AdapterError> {
        adapter.start(publisher).await?;
        let id = adapter.id().to_string();
        let previous = self.adapters.insert(id.clone(), adapter);
        if let Some(previous) = previous {
            info!(%id, "adapter hot-swapped, stopping previous instance");
            if let Err(e) = previous.stop().await {
                warn!(%id, error = %e, "previous adapter instance failed to stop");
            }
        } else {
            info!(%id, "adapter registered");
        }
        Ok(())
    }

    /// Stop and remove one adapter; returns whether it existed.
    pub async fn unregister(&self, id: &str) -> bool {
        let Some((_, adapter)) = self.adapters.remove(id) else {
            return false;
        };
        if let Err(e) = adapter.stop().await {
            warn!(%id, error = %e, "adapter failed to stop on unregister");
        }
        true
    }

    /// Forward an envelope to the adapter owning the longest matching
    /// subject prefix. Returns `false` when no adapter matches.
    ///
    /// # Errors
    ///
    /// Returns the adapter's delivery error; the caller logs it - an
    /// adapter failure never affects mailbox deliveries.
    pub async fn deliver(
        &self,
        subject: &Subject,
        envelope: &Envelope,
    ) -> Result<bool, AdapterError> {
        let mut best: Option<Arc<dyn ChannelAdapter>> = None;
        let mut best_len = 0;
        for entry in self.adapters.iter() {
            let prefix = entry.value().subject_prefix();
            if subject.as_str().starts_with(prefix) && prefix.len() >= best_len {
                best_len = prefix.len();
                best = Some(Arc::clone(entry.value()));
            }
        }
        let Some(adapter) = best else {
            return Ok(false);
        };
        adapter.deliver(subject, envelope).await?;
        Ok(true)
    }

    /// Fetch one adapter by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Listing of all registered adapters.
    pub fn list(&self) -> Vec<AdapterInfo> {
        let mut infos: Vec<AdapterInfo> = self
            .adapters
            .iter()
            .map(|entry| {
                let adapter = entry.value();
                let manifest = adapter.manifest().unwrap_or_else(|| AdapterManifest {
                    id: adapter.id().to_string(),
                    display_name: adapter.display_name().to_string(),
                    description: None,
                });
                AdapterInfo {
                    id: adapter.id().to_string(),
                    subject_prefix: adapter.subject_prefix().to_string(),
                    manifest,
                    status: adapter.status(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapters are registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Stop every adapter concurrently, tolerating individual failures.
    pub async fn shutdown(&self) {
        let adapters: Vec<(String, Arc<dyn ChannelAdapter>)> = self
            .adapters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        self.adapters.clear();

        let stops = adapters.into_iter().map(|(id, adapter)| async move {
            if let Err(e) = adapter.stop().await {
                warn!(%id, error = %e, "adapter failed to stop during shutdown");
            }
        });
        join_all(stops).await;
    }
}
