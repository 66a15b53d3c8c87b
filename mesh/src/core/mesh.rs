// Layer 1: Standard library imports
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

// Layer 3: Internal module imports
use super::bridge::{BridgeError, RelayBridge};
use crate::config::MeshConfig;
use crate::discovery::{
    default_strategies, scan_directory, DiscoveryEvent, DiscoveryStrategy,
};
use crate::manifest::{
    manifest_path, write_manifest, AgentBudgetDefaults, AgentId, AgentManifest, ManifestError,
    ResponseMode,
};
use crate::namespace::{self, NamespaceError};
use crate::registry::{
    AgentRegistry, AgentRegistryEntry, AgentStats, HealthStatus, Reachability, RegistryError,
};
use crate::topology::{TopologyError, TopologyManager};
use dork_relay::access::{AccessError, AccessRules};
use dork_relay::core::EndpointRegistrar;
use dork_relay::signal::{Signal, SignalSink, SignalState, SignalType};

/// Signal topic for derived health transitions.
const HEALTH_CHANGED_TOPIC: &str = "mesh.agent.lifecycle.health_changed";

/// Failures in agent lifecycle operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Manifest I/O failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Namespace derivation failure.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// The bus refused an endpoint operation.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Topology composition failure.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Rule store failure.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Invalid configuration value.
    #[error("invalid mesh config: {0}")]
    Config(String),

    /// No agent with this id.
    #[error("agent {id} not found")]
    AgentNotFound {
        /// The unknown id.
        id: AgentId,
    },
}

/// Caller-supplied overrides merged over discovery hints at
/// registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterOverrides {
    /// Override the agent name.
    pub name: Option<String>,
    /// Override the description.
    pub description: Option<String>,
    /// Override the capability tags.
    pub capabilities: Option<Vec<String>>,
    /// Pin an explicit namespace into the manifest.
    pub namespace: Option<String>,
    /// Override the response policy.
    pub response_mode: Option<ResponseMode>,
    /// Override the budget defaults.
    pub budget: Option<AgentBudgetDefaults>,
}

/// The agent lifecycle orchestrator.
///
/// Discovers agents, writes their manifests, keeps the registry, and
/// mirrors every registered agent onto the bus through the
/// [`RelayBridge`]. Mesh defines who exists; the bus defines how they
/// talk.
pub struct MeshCore {
    config: MeshConfig,
    registry: Arc<AgentRegistry>,
    bridge: RelayBridge,
    access: Arc<dyn AccessRules>,
    topology: TopologyManager,
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    signals: Option<Arc<dyn SignalSink>>,
}

impl MeshCore {
    /// Open the registry and wire the lifecycle against the bus seams.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] on invalid config or registry failure.
    pub fn open(
        config: MeshConfig,
        registrar: Arc<dyn EndpointRegistrar>,
        access: Arc<dyn AccessRules>,
    ) -> Result<Self, MeshError> {
        config.validate().map_err(MeshError::Config)?;
        let registry = Arc::new(AgentRegistry::open(&config.db_path)?);
        Ok(Self::assemble(config, registry, registrar, access))
    }

    /// Like [`MeshCore::open`] with an in-memory registry, for tests
    /// and ephemeral runs.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] on registry failure.
    pub fn open_in_memory(
        config: MeshConfig,
        registrar: Arc<dyn EndpointRegistrar>,
        access: Arc<dyn AccessRules>,
    ) -> Result<Self, MeshError> {
        let registry = Arc::new(AgentRegistry::open_in_memory()?);
        Ok(Self::assemble(config, registry, registrar, access))
    }

    fn assemble(
        config: MeshConfig,
        registry: Arc<AgentRegistry>,
        registrar: Arc<dyn EndpointRegistrar>,
        access: Arc<dyn AccessRules>,
    ) -> Self {
        let topology = TopologyManager::new(Arc::clone(&registry), Arc::clone(&access));
        Self {
            config,
            registry,
            bridge: RelayBridge::new(registrar),
            access,
            topology,
            strategies: default_strategies(),
            signals: None,
        }
    }

    /// Builder method: emit health-transition signals into this sink.
    pub fn with_signals(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Builder method: replace the discovery strategy set.
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// The namespace-scoped topology view.
    pub fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    /// Fan out discovery over the given roots, streaming findings as
    /// they are found. Already-registered paths never surface as
    /// candidates; directories with manifests surface as auto-imports.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the known-path set cannot be read.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<mpsc::Receiver<DiscoveryEvent>, MeshError> {
        let known_paths: HashSet<PathBuf> = self
            .registry
            .list()?
            .into_iter()
            .map(|entry| entry.project_path)
            .collect();
        let denial_list: HashSet<PathBuf> = self.config.denial_list.iter().cloned().collect();

        let (tx, rx) = mpsc::channel(64);
        for root in roots {
            let mut events = scan_directory(
                root.clone(),
                self.strategies.clone(),
                known_paths.clone(),
                denial_list.clone(),
                self.config.scan.clone(),
            );
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(rx)
    }

    /// Approve a candidate: assign an id, merge hints with overrides,
    /// write `.dork/agent.json`, upsert the registry, and register the
    /// endpoint on the bus.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when any step fails; steps run in that
    /// order, so a bridge failure leaves a valid manifest and registry
    /// entry behind for retry.
    pub async fn register(
        &self,
        path: &Path,
        scan_root: &Path,
        overrides: RegisterOverrides,
        approver: &str,
    ) -> Result<AgentRegistryEntry, MeshError> {
        let hints = self.strategies.iter().find_map(|s| s.probe(path));

        let mut manifest = AgentManifest::new(
            overrides
                .name
                .or_else(|| hints.as_ref().map(|h| h.suggested_name.clone()))
                .unwrap_or_else(|| default_name(path)),
            hints
                .as_ref()
                .map(|h| h.detected_runtime.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        manifest.description = overrides
            .description
            .or_else(|| hints.as_ref().and_then(|h| h.description.clone()));
        manifest.capabilities = overrides
            .capabilities
            .or_else(|| hints.as_ref().map(|h| h.inferred_capabilities.clone()))
            .unwrap_or_default();
        if let Some(response_mode) = overrides.response_mode {
            manifest.behavior.response_mode = response_mode;
        }
        if let Some(budget) = overrides.budget {
            manifest.budget = budget;
        }
        manifest.namespace = overrides.namespace;
        manifest.registered_at = Utc::now();
        manifest.registered_by = Some(approver.to_string());

        let entry = self
            .install(path, scan_root, manifest)
            .await?;
        info!(id = %entry.manifest.id, namespace = %entry.namespace, "agent registered");
        Ok(entry)
    }

    /// Upsert path for scanner auto-imports: the manifest already
    /// exists, only registry and endpoint need to catch up.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when validation, namespace resolution, the
    /// registry, or the bridge fail.
    pub async fn import_manifest(
        &self,
        path: &Path,
        scan_root: &Path,
        manifest: AgentManifest,
    ) -> Result<AgentRegistryEntry, MeshError> {
        manifest.validate().map_err(|reason| {
            ManifestError::Invalid {
                path: manifest_path(path),
                reason,
            }
        })?;
        let entry = self.install(path, scan_root, manifest).await?;
        info!(id = %entry.manifest.id, namespace = %entry.namespace, "agent imported");
        Ok(entry)
    }

    async fn install(
        &self,
        path: &Path,
        scan_root: &Path,
        manifest: AgentManifest,
    ) -> Result<AgentRegistryEntry, MeshError> {
        let namespace =
            namespace::resolve(path, scan_root, manifest.namespace.as_deref())?;
        write_manifest(path, &manifest).await?;

        let entry = AgentRegistryEntry {
            manifest,
            project_path: path.to_path_buf(),
            scan_root: scan_root.to_path_buf(),
            namespace: namespace.clone(),
            last_seen_at: None,
            last_seen_event: None,
            reachability: Reachability::Active,
            unreachable_since: None,
        };
        self.registry.upsert(&entry)?;
        self.bridge
            .register_agent(&namespace, entry.manifest.id)
            .await?;
        Ok(entry)
    }

    /// Remove an agent: registry row, bus endpoint, and - when it was
    /// the last of its namespace - the namespace's access rules.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::AgentNotFound`] for unknown ids.
    pub async fn unregister(&self, id: AgentId) -> Result<(), MeshError> {
        let entry = self
            .registry
            .get(id)?
            .ok_or(MeshError::AgentNotFound { id })?;
        self.registry.remove(id)?;
        self.bridge.unregister_agent(&entry.namespace, id).await?;

        if self.registry.list_by_namespace(&entry.namespace)?.is_empty() {
            self.collect_namespace_rules(&entry.namespace)?;
        }
        info!(%id, namespace = %entry.namespace, "agent unregistered");
        Ok(())
    }

    /// Drop every access rule referencing an emptied namespace.
    fn collect_namespace_rules(&self, namespace: &str) -> Result<(), MeshError> {
        let prefix = format!("relay.agent.{namespace}.");
        for rule in self.access.rules() {
            if rule.from.as_str().starts_with(&prefix) || rule.to.as_str().starts_with(&prefix) {
                let removed = self.access.remove_rules(&rule.from, &rule.to)?;
                if removed > 0 {
                    info!(namespace, from = rule.from.as_str(), to = rule.to.as_str(),
                        "garbage-collected namespace access rule");
                }
            }
        }
        Ok(())
    }

    /// Record observed activity and derive the new health status. A
    /// status transition emits a lifecycle signal when a sink is wired;
    /// without one this is a plain health update.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::AgentNotFound`] for unknown ids.
    pub async fn update_last_seen(
        &self,
        id: AgentId,
        event: &str,
    ) -> Result<HealthStatus, MeshError> {
        let previous = self
            .registry
            .get_with_health(id, &self.config.health)?
            .ok_or(MeshError::AgentNotFound { id })?
            .1;
        self.registry.update_health(id, Utc::now(), event)?;
        let (entry, current) = self
            .registry
            .get_with_health(id, &self.config.health)?
            .ok_or(MeshError::AgentNotFound { id })?;

        if previous != current {
            if let Some(signals) = &self.signals {
                signals.emit(
                    Signal::now(
                        SignalType::Presence,
                        health_signal_state(current),
                        HEALTH_CHANGED_TOPIC,
                    )
                    .with_data(serde_json::json!({
                        "agentId": id.to_string(),
                        "subject": entry.subject(),
                        "previous": previous.to_string(),
                        "current": current.to_string(),
                        "event": event,
                    })),
                );
            }
        }
        Ok(current)
    }

    /// Mark every agent whose project directory disappeared as
    /// unreachable; returns the ids that flipped.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] on registry failure.
    pub async fn sweep_unreachable(&self) -> Result<Vec<AgentId>, MeshError> {
        let mut flipped = Vec::new();
        for entry in self.registry.list()? {
            if entry.reachability == Reachability::Unreachable {
                continue;
            }
            let exists = tokio::fs::metadata(&entry.project_path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !exists {
                warn!(id = %entry.manifest.id, path = %entry.project_path.display(),
                    "project directory vanished, marking unreachable");
                self.registry.mark_unreachable(entry.manifest.id)?;
                flipped.push(entry.manifest.id);
            }
        }
        Ok(flipped)
    }

    /// Fan-out counts for the status dashboard.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] on registry failure.
    pub fn stats(&self) -> Result<AgentStats, MeshError> {
        Ok(self.registry.aggregate_stats(&self.config.health)?)
    }
}

fn default_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "agent".to_string())
}

fn health_signal_state(status: HealthStatus) -> SignalState {
    match status {
        HealthStatus::Active => SignalState::Started,
        HealthStatus::Inactive => SignalState::Warning,
        HealthStatus::Stale => SignalState::Critical,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::manifest::read_manifest;
    use async_trait::async_trait;
    use dork_relay::access::AccessControl;
    use dork_relay::core::{CoreError, Endpoint};
    use dork_relay::index::SqliteIndex;
    use dork_relay::subject::Subject;
    use parking_lot::Mutex;
    use tempfile::TempDir;

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

        async fn unregister_endpoint(&self, _subject: &Subject) -> Result<(), CoreError> {
            self.unregistered.lock().push(_subject.to_string());
            Ok(())
        }
    }

    struct Fixture {
        mesh: MeshCore,
        registrar: Arc<RecordingRegistrar>,
        access: Arc<dyn AccessRules>,
        _root: TempDir,
        scan_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let scan_root = root.path().to_path_buf();
        let registrar = Arc::new(RecordingRegistrar::default());
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let access: Arc<dyn AccessRules> = Arc::new(AccessControl::load(index).unwrap());
        let mesh = MeshCore::open_in_memory(
            MeshConfig::new(root.path().join("mesh.db")),
            registrar.clone() as Arc<dyn EndpointRegistrar>,
            Arc::clone(&access),
        )
        .unwrap();
        Fixture {
            mesh,
            registrar,
            access,
            _root: root,
            scan_root,
        }
    }

    fn make_project(scan_root: &Path, rel: &str) -> PathBuf {
        let dir = scan_root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("CLAUDE.md"), "# agent").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_register_writes_manifest_and_endpoint() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team-a/summarizer");

        let entry = f
            .mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();

        assert_eq!(entry.namespace, "team-a");
        assert_eq!(entry.manifest.name, "summarizer");
        assert_eq!(entry.manifest.runtime, "claude-code");
        assert_eq!(entry.manifest.registered_by.as_deref(), Some("admin"));

        // Manifest written to disk.
        let written = read_manifest(&project).await.unwrap();
        assert_eq!(written.id, entry.manifest.id);

        // Endpoint registered on the bus.
        let registered = f.registrar.registered.lock().clone();
        assert_eq!(registered, vec![entry.subject()]);
    }

    #[tokio::test]
    async fn test_register_applies_overrides() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team-a/raw");

        let entry = f
            .mesh
            .register(
                &project,
                &f.scan_root,
                RegisterOverrides {
                    name: Some("Custom Name".to_string()),
                    namespace: Some("Special Team".to_string()),
                    capabilities: Some(vec!["review".to_string()]),
                    ..RegisterOverrides::default()
                },
                "admin",
            )
            .await
            .unwrap();

        assert_eq!(entry.manifest.name, "Custom Name");
        assert_eq!(entry.namespace, "special-team");
        assert_eq!(entry.manifest.capabilities, vec!["review".to_string()]);
    }

    #[tokio::test]
    async fn test_import_manifest_keeps_existing_id() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team-b/existing");
        let manifest = AgentManifest::new("existing", "cursor");
        let id = manifest.id;

        let entry = f
            .mesh
            .import_manifest(&project, &f.scan_root, manifest)
            .await
            .unwrap();
        assert_eq!(entry.manifest.id, id);
        assert_eq!(entry.namespace, "team-b");
    }

    #[tokio::test]
    async fn test_unregister_removes_and_collects_rules() {
        let f = fixture();
        let project = make_project(&f.scan_root, "solo/agent");
        let entry = f
            .mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();

        f.mesh.topology().allow_cross_namespace("solo", "other").unwrap();
        assert_eq!(f.access.rules().len(), 1);

        f.mesh.unregister(entry.manifest.id).await.unwrap();
        assert!(f.mesh.registry().get(entry.manifest.id).unwrap().is_none());
        assert_eq!(f.registrar.unregistered.lock().len(), 1);
        // The namespace emptied, so its rule was garbage-collected.
        assert!(f.access.rules().is_empty());
    }

    #[tokio::test]
    async fn test_update_last_seen_transitions_health() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team/agent");
        let entry = f
            .mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();

        let status = f
            .mesh
            .update_last_seen(entry.manifest.id, "message_received")
            .await
            .unwrap();
        assert_eq!(status, HealthStatus::Active);
    }

    #[tokio::test]
    async fn test_discover_skips_registered_paths() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team/registered");
        f.mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();
        make_project(&f.scan_root, "team/unregistered");

        let mut events = f.mesh.discover(&[f.scan_root.clone()]).unwrap();
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        // The registered project auto-imports (it has a manifest); the
        // fresh one is a candidate.
        let candidates: Vec<_> = seen
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Candidate { .. }))
            .collect();
        assert_eq!(candidates.len(), 1);
        let imports: Vec<_> = seen
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::AutoImport { .. }))
            .collect();
        assert_eq!(imports.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_unreachable() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team/vanishing");
        let entry = f
            .mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();

        assert!(f.mesh.sweep_unreachable().await.unwrap().is_empty());

        std::fs::remove_dir_all(&project).unwrap();
        let flipped = f.mesh.sweep_unreachable().await.unwrap();
        assert_eq!(flipped, vec![entry.manifest.id]);
        assert_eq!(
            f.mesh.registry().get(entry.manifest.id).unwrap().unwrap().reachability,
            Reachability::Unreachable
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let f = fixture();
        let project = make_project(&f.scan_root, "team/agent");
        f.mesh
            .register(&project, &f.scan_root, RegisterOverrides::default(), "admin")
            .await
            .unwrap();

        let stats = f.mesh.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.namespaces, vec![("team".to_string(), 1)]);
    }
}
