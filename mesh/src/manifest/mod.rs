//! Agent manifests: the `.dork/agent.json` file every agent carries.

mod io;
mod types;

pub use io::{manifest_exists, manifest_path, read_manifest, write_manifest, ManifestError};
pub use types::{AgentBudgetDefaults, AgentId, AgentManifest, BehaviorConfig, ResponseMode};
