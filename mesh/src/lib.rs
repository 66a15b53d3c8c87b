//! # dork-mesh - agent discovery and registry
//!
//! A persistent registry of agents (project directories carrying a
//! `.dork/agent.json` manifest), organised into namespaces derived from
//! scan roots. Pluggable filesystem strategies discover candidates; the
//! topology manager composes the registry with access rules into a
//! namespace-scoped view; and every registered agent is mirrored onto
//! the bus as an endpoint. Mesh defines *who exists*; the bus defines
//! *how they talk*.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dork_mesh::{MeshConfig, MeshCore, RegisterOverrides};
//!
//! let mesh = MeshCore::open(
//!     MeshConfig::new("/var/lib/mesh.db"),
//!     relay.clone_registrar(),   // Arc<dyn EndpointRegistrar>
//!     relay.access(),            // Arc<dyn AccessRules>
//! )?;
//!
//! // Stream discovery findings.
//! let mut events = mesh.discover(&[scan_root.clone()])?;
//! while let Some(event) = events.recv().await {
//!     // AutoImport entries upsert silently; candidates await approval.
//! }
//!
//! // Approve a candidate.
//! let entry = mesh
//!     .register(&project, &scan_root, RegisterOverrides::default(), "admin")
//!     .await?;
//! println!("agent {} owns {}", entry.manifest.name, entry.subject());
//! ```
//!
//! # Module Organization
//!
//! - [`manifest`] - the `.dork/agent.json` document and its atomic I/O
//! - [`namespace`] - namespace derivation and normalisation
//! - [`registry`] - the persistent agent table with derived health
//! - [`discovery`] - strategies and the scanning walk
//! - [`topology`] - namespace-scoped, rule-filtered agent graph views
//! - [`core`] - MeshCore lifecycle orchestration and the Relay bridge

pub mod config;
pub mod core;
pub mod discovery;
pub mod manifest;
pub mod namespace;
pub mod registry;
pub mod topology;

// Re-export commonly used types
pub use config::MeshConfig;
pub use self::core::{BridgeError, MeshCore, MeshError, RegisterOverrides, RelayBridge};
pub use discovery::{
    default_strategies, scan_directory, DiscoveryEvent, DiscoveryHints, DiscoveryStrategy,
    ScanOptions,
};
pub use manifest::{
    manifest_path, read_manifest, write_manifest, AgentBudgetDefaults, AgentId, AgentManifest,
    BehaviorConfig, ManifestError, ResponseMode,
};
pub use namespace::{normalize as normalize_namespace, resolve as resolve_namespace, NamespaceError};
pub use registry::{
    AgentFilter, AgentRegistry, AgentRegistryEntry, AgentStats, HealthStatus, HealthThresholds,
    Reachability, RegistryError,
};
pub use topology::{
    AgentSummary, NamespaceTopology, TopologyError, TopologyManager, TopologyView,
    ADMIN_NAMESPACE,
};
