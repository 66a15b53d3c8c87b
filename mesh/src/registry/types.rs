// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::manifest::AgentManifest;

/// Derived liveness, never stored: computed from `last_seen_at` against
/// the configured thresholds at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Seen within the active window.
    Active,
    /// Seen within the inactive window.
    Inactive,
    /// Older than both windows, or never seen.
    Stale,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// Whether the agent's project directory still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    /// The project directory is present.
    Active,
    /// The project directory disappeared; durable until re-registered.
    Unreachable,
}

impl Reachability {
    /// Stable lowercase name used in persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Unreachable => "unreachable",
        }
    }
}

impl FromStr for Reachability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "unreachable" => Ok(Self::Unreachable),
            other => Err(format!("unknown reachability {other:?}")),
        }
    }
}

/// Windows for deriving [`HealthStatus`].
///
/// Surfaced as configuration; the defaults are five minutes to stay
/// `active` and thirty to stay `inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Seen within this window counts as active.
    pub active_within: Duration,

    /// Seen within this window counts as inactive (beyond it, stale).
    pub inactive_within: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            active_within: Duration::from_secs(5 * 60),
            inactive_within: Duration::from_secs(30 * 60),
        }
    }
}

impl HealthThresholds {
    /// Derive health from the last-seen instant.
    pub fn derive(&self, last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> HealthStatus {
        let Some(last_seen) = last_seen_at else {
            return HealthStatus::Stale;
        };
        let age = now.signed_duration_since(last_seen);
        let age = match age.to_std() {
            Ok(age) => age,
            // A last-seen in the future counts as just seen.
            Err(_) => return HealthStatus::Active,
        };
        if age < self.active_within {
            HealthStatus::Active
        } else if age < self.inactive_within {
            HealthStatus::Inactive
        } else {
            HealthStatus::Stale
        }
    }
}

/// One registered agent: the manifest plus placement and health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistryEntry {
    /// The authored manifest.
    pub manifest: AgentManifest,

    /// Absolute project directory; unique across the registry.
    pub project_path: PathBuf,

    /// The scan root this agent was discovered under.
    pub scan_root: PathBuf,

    /// Resolved namespace (manifest or path-derived, normalised).
    pub namespace: String,

    /// Last observed activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,

    /// What the last observed activity was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_event: Option<String>,

    /// Whether the project directory still exists.
    pub reachability: Reachability,

    /// When the project directory was found missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreachable_since: Option<DateTime<Utc>>,
}

impl AgentRegistryEntry {
    /// The Relay endpoint subject this agent owns.
    pub fn subject(&self) -> String {
        format!("relay.agent.{}.{}", self.namespace, self.manifest.id)
    }
}

/// Conjunctive listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFilter {
    /// Keep agents in this namespace.
    pub namespace: Option<String>,
    /// Keep agents with this runtime tag.
    pub runtime: Option<String>,
    /// Keep agents carrying this capability tag.
    pub capability: Option<String>,
}

/// Fan-out counts for the status dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    /// All registered agents.
    pub total: u64,
    /// Derived-active agents.
    pub active: u64,
    /// Derived-inactive agents.
    pub inactive: u64,
    /// Derived-stale agents.
    pub stale: u64,
    /// Agents whose project directory disappeared.
    pub unreachable: u64,
    /// Agent count per namespace.
    pub namespaces: Vec<(String, u64)>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_health_derivation_windows() {
        let thresholds = HealthThresholds::default();
        let now = Utc::now();

        assert_eq!(thresholds.derive(None, now), HealthStatus::Stale);
        assert_eq!(
            thresholds.derive(Some(now - ChronoDuration::seconds(30)), now),
            HealthStatus::Active
        );
        assert_eq!(
            thresholds.derive(Some(now - ChronoDuration::minutes(10)), now),
            HealthStatus::Inactive
        );
        assert_eq!(
            thresholds.derive(Some(now - ChronoDuration::hours(2)), now),
            HealthStatus::Stale
        );
    }

    #[test]
    fn test_future_last_seen_is_active() {
        let thresholds = HealthThresholds::default();
        let now = Utc::now();
        assert_eq!(
            thresholds.derive(Some(now + ChronoDuration::seconds(5)), now),
            HealthStatus::Active
        );
    }

    #[test]
    fn test_entry_subject() {
        let manifest = crate::manifest::AgentManifest::new("a", "codex");
        let id = manifest.id;
        let entry = AgentRegistryEntry {
            manifest,
            project_path: PathBuf::from("/scan/team/project"),
            scan_root: PathBuf::from("/scan"),
            namespace: "team".to_string(),
            last_seen_at: None,
            last_seen_event: None,
            reachability: Reachability::Active,
            unreachable_since: None,
        };
        assert_eq!(entry.subject(), format!("relay.agent.team.{id}"));
    }
}
