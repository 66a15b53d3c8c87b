// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// Layer 3: Internal module imports
use super::error::AdapterError;
use super::traits::{AdapterManifest, AdapterState, AdapterStatus, ChannelAdapter};
use crate::core::Publisher;
use crate::message::Envelope;
use crate::subject::Subject;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration of the builtin webhook adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Adapter id.
    pub id: String,

    /// Subject prefix this webhook transports.
    pub subject_prefix: String,

    /// Target URL receiving envelope POSTs.
    pub url: String,

    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    subject: &'a str,
    envelope: &'a Envelope,
}

/// Builtin adapter POSTing envelope JSON to a configured URL.
///
/// Outbound only: inbound webhook traffic enters the bus through the
/// HTTP collaborators outside the core, so `start` just validates the
/// target and flips the state.
pub struct WebhookAdapter {
    config: WebhookConfig,
    client: reqwest::Client,
    state: RwLock<AdapterState>,
}

impl WebhookAdapter {
    /// Build from a typed config.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidShape`] for an unparseable URL or
    /// a zero timeout.
    pub fn new(config: WebhookConfig) -> Result<Self, AdapterError> {
        if reqwest::Url::parse(&config.url).is_err() {
            return Err(AdapterError::InvalidShape {
                id: config.id.clone(),
                detail: format!("invalid url {:?}", config.url),
            });
        }
        if config.timeout_secs == 0 {
            return Err(AdapterError::InvalidShape {
                id: config.id.clone(),
                detail: "timeout must be > 0".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::StartFailed {
                id: config.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            client,
            state: RwLock::new(AdapterState::Stopped),
        })
    }

    /// Factory entry point for the builtin catalog.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Config`] when the JSON does not parse,
    /// [`AdapterError::InvalidShape`] for invalid values.
    pub fn from_config(config: serde_json::Value) -> Result<Self, AdapterError> {
        let config: WebhookConfig =
            serde_json::from_value(config).map_err(|source| AdapterError::Config {
                id: "webhook".to_string(),
                source,
            })?;
        Self::new(config)
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn subject_prefix(&self) -> &str {
        &self.config.subject_prefix
    }

    fn display_name(&self) -> &str {
        self.config.display_name.as_deref().unwrap_or("Webhook")
    }

    async fn start(&self, _publisher: Arc<dyn Publisher>) -> Result<(), AdapterError> {
        *self.state.write() = AdapterState::Running;
        debug!(id = %self.config.id, url = %self.config.url, "webhook adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        *self.state.write() = AdapterState::Stopped;
        Ok(())
    }

    async fn deliver(&self, subject: &Subject, envelope: &Envelope) -> Result<(), AdapterError> {
        let body = WebhookBody {
            subject: subject.as_str(),
            envelope,
        };
        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::DeliveryFailed {
                id: self.config.id.clone(),
                reason: e.to_string(),
            })?;
        response
            .error_for_status()
            .map_err(|e| AdapterError::DeliveryFailed {
                id: self.config.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus::of(*self.state.read())
    }

    fn manifest(&self) -> Option<AdapterManifest> {
        Some(AdapterManifest {
            id: self.config.id.clone(),
            display_name: self.display_name().to_string(),
            description: Some(format!("POSTs envelopes to {}", self.config.url)),
        })
    }
}
