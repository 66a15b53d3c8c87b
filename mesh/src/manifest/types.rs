// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// Layer 3: Internal module imports
// (none)

/// Unique, lexicographically sortable agent identifier.
///
/// Assigned once at first registration and carried in the manifest from
/// then on; doubles as the last segment of the agent's endpoint subject.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(Ulid);

impl AgentId {
    /// Generate a new id stamped with the current time.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Wrap an existing ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// The underlying ULID.
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

/// When an agent responds to inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Respond to every inbound message.
    #[default]
    Always,
    /// Respond only when explicitly invoked.
    Manual,
}

/// Behavioral knobs authored in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorConfig {
    /// Response policy.
    pub response_mode: ResponseMode,
}

/// Budget defaults stamped onto envelopes this agent originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentBudgetDefaults {
    /// Hop bound per outgoing message.
    pub max_hops_per_message: u32,

    /// Call allowance per hour.
    pub max_calls_per_hour: u32,
}

impl Default for AgentBudgetDefaults {
    fn default() -> Self {
        Self {
            max_hops_per_message: 3,
            max_calls_per_hour: 60,
        }
    }
}

/// The `.dork/agent.json` document.
///
/// Authored per project; unknown fields are preserved across a
/// read-modify-write cycle so other tools can annotate the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    /// Assigned at first registration.
    pub id: AgentId,

    /// Human label.
    pub name: String,

    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tag of the strategy that recognised this agent
    /// (`claude-code`, `cursor`, `codex`, ...).
    pub runtime: String,

    /// Free-form capability tags used for filtering.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Behavioral knobs.
    #[serde(default)]
    pub behavior: BehaviorConfig,

    /// Budget defaults for outgoing envelopes.
    #[serde(default)]
    pub budget: AgentBudgetDefaults,

    /// Explicit namespace; derived from the scan root when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Registration time.
    pub registered_at: DateTime<Utc>,

    /// Who approved the registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_by: Option<String>,

    /// Unknown fields, preserved on re-write.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentManifest {
    /// A minimal manifest ready for first registration.
    pub fn new(name: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: None,
            runtime: runtime.into(),
            capabilities: Vec::new(),
            behavior: BehaviorConfig::default(),
            budget: AgentBudgetDefaults::default(),
            namespace: None,
            registered_at: Utc::now(),
            registered_by: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Structural validation applied on read and before write.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.runtime.trim().is_empty() {
            return Err("runtime must not be empty".to_string());
        }
        if self.budget.max_hops_per_message == 0 {
            return Err("budget.maxHopsPerMessage must be > 0".to_string());
        }
        Ok(())
    }
}
