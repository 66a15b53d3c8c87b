// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;
use tracing::warn;

// Layer 3: Internal module imports
use crate::manifest::AgentId;
use dork_relay::core::{CoreError, Endpoint, EndpointRegistrar};
use dork_relay::subject::{Subject, SubjectError};

/// Failures crossing from Mesh into the bus.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A synthesised endpoint subject failed validation.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// The bus refused the endpoint operation.
    #[error(transparent)]
    Relay(#[from] CoreError),
}

/// The one-way glue from Mesh onto the bus.
///
/// Mesh decides *who exists*; the bus decides *how they talk*. This
/// bridge is the entire contact surface: a narrow registrar trait, no
/// bus internals.
pub struct RelayBridge {
    registrar: Arc<dyn EndpointRegistrar>,
}

impl RelayBridge {
    /// Wire the bridge to a registrar (normally `RelayCore`).
    pub fn new(registrar: Arc<dyn EndpointRegistrar>) -> Self {
        Self { registrar }
    }

    /// The endpoint subject owned by an agent.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectError`] if namespace or id produce an invalid
    /// subject (normalised namespaces never do).
    pub fn agent_subject(namespace: &str, id: AgentId) -> Result<Subject, SubjectError> {
        Subject::new(format!("relay.agent.{namespace}.{id}"))
    }

    /// Register an agent's endpoint on the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the mailbox cannot be prepared.
    pub async fn register_agent(
        &self,
        namespace: &str,
        id: AgentId,
    ) -> Result<Endpoint, BridgeError> {
        let subject = Self::agent_subject(namespace, id)?;
        Ok(self.registrar.register_endpoint(&subject).await?)
    }

    /// Unregister an agent's endpoint. An already-missing endpoint is
    /// tolerated - unregistration is cleanup, not a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] for failures other than a missing
    /// endpoint.
    pub async fn unregister_agent(&self, namespace: &str, id: AgentId) -> Result<(), BridgeError> {
        let subject = Self::agent_subject(namespace, id)?;
        match self.registrar.unregister_endpoint(&subject).await {
            Ok(()) => Ok(()),
            Err(CoreError::EndpointNotFound { .. }) => {
                warn!(%subject, "endpoint already gone during unregister");
                Ok(())
            }
            Err(e) => Err(BridgeError::Relay(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingRegistrar {
        registered: Mutex<Vec<String>>,
        unregistered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EndpointRegistrar for RecordingRegistrar {
        async fn register_endpoint(&self, subject: &Subject) -> Result<Endpoint, CoreError> {
            self.registered.lock().push(subject.to_string());
            Ok(Endpoint {
                subject: subject.clone(),
                hash: "hash".to_string(),
                maildir_path: PathBuf::from("/tmp/mailboxes/hash"),
            })
        }

        async fn unregister_endpoint(&self, subject: &Subject) -> Result<(), CoreError> {
            self.unregistered.lock().push(subject.to_string());
            Err(CoreError::EndpointNotFound {
                subject: subject.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_register_builds_agent_subject() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let bridge = RelayBridge::new(registrar.clone() as Arc<dyn EndpointRegistrar>);
        let id = AgentId::new();

        let endpoint = bridge.register_agent("team", id).await.unwrap();
        assert_eq!(endpoint.subject.as_str(), format!("relay.agent.team.{id}"));
        assert_eq!(registrar.registered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_tolerates_missing_endpoint() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let bridge = RelayBridge::new(registrar.clone() as Arc<dyn EndpointRegistrar>);

        bridge
            .unregister_agent("team", AgentId::new())
            .await
            .unwrap();
        assert_eq!(registrar.unregistered.lock().len(), 1);
    }
}
