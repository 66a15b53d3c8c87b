//! Namespace-scoped composition of the agent registry and access rules.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::Serialize;
use thiserror::Error;
use tracing::info;

// Layer 3: Internal module imports
use crate::manifest::AgentId;
use crate::namespace::{self, NamespaceError};
use crate::registry::{AgentRegistry, AgentRegistryEntry, RegistryError};
use dork_relay::access::{AccessError, AccessRule, AccessRules, RuleAction};
use dork_relay::subject::{Subject, SubjectError, SubjectPattern};

/// Admin sentinel: sees the full topology.
pub const ADMIN_NAMESPACE: &str = "*";

/// Priority used for namespace-level allow rules.
const CROSS_NAMESPACE_PRIORITY: i32 = 100;

/// Failures composing the topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Rule store failure.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// A namespace failed validation.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// A synthesised subject failed validation.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// No agent with this id.
    #[error("agent {id} not found")]
    AgentNotFound {
        /// The unknown id.
        id: AgentId,
    },
}

/// One agent in a topology listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// Agent id.
    pub id: AgentId,
    /// Human label.
    pub name: String,
    /// The Relay endpoint subject.
    pub subject: String,
    /// Runtime tag.
    pub runtime: String,
}

impl From<&AgentRegistryEntry> for AgentSummary {
    fn from(entry: &AgentRegistryEntry) -> Self {
        Self {
            id: entry.manifest.id,
            name: entry.manifest.name.clone(),
            subject: entry.subject(),
            runtime: entry.manifest.runtime.clone(),
        }
    }
}

/// All agents of one namespace visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceTopology {
    /// The namespace.
    pub namespace: String,
    /// Its agents.
    pub agents: Vec<AgentSummary>,
}

/// The namespace-scoped, rule-filtered view of the agent graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyView {
    /// Visible namespaces in sorted order.
    pub namespaces: Vec<NamespaceTopology>,
}

/// Composes the registry and access rules into visibility answers.
pub struct TopologyManager {
    registry: Arc<AgentRegistry>,
    access: Arc<dyn AccessRules>,
}

impl TopologyManager {
    /// Wire the manager to its registry and rule table.
    pub fn new(registry: Arc<AgentRegistry>, access: Arc<dyn AccessRules>) -> Self {
        Self { registry, access }
    }

    /// The namespaces (and their agents) the caller may see: its own
    /// namespace plus every namespace reachable through an active allow
    /// rule. `"*"` returns everything.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] for registry failures or an invalid
    /// caller namespace.
    pub fn get_topology(&self, caller_namespace: &str) -> Result<TopologyView, TopologyError> {
        let entries = self.registry.list()?;
        let mut namespaces: Vec<NamespaceTopology> = Vec::new();
        for entry in &entries {
            match namespaces
                .iter_mut()
                .find(|ns| ns.namespace == entry.namespace)
            {
                Some(ns) => ns.agents.push(AgentSummary::from(entry)),
                None => namespaces.push(NamespaceTopology {
                    namespace: entry.namespace.clone(),
                    agents: vec![AgentSummary::from(entry)],
                }),
            }
        }
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        if caller_namespace == ADMIN_NAMESPACE {
            return Ok(TopologyView { namespaces });
        }

        let caller = normalized(caller_namespace)?;
        let probe = probe_subject(&caller)?;
        namespaces.retain(|ns| {
            ns.namespace == caller
                || ns.agents.iter().any(|agent| {
                    Subject::new(agent.subject.clone())
                        .map(|subject| self.access.is_allowed(&probe, &subject))
                        .unwrap_or(false)
                })
        });
        Ok(TopologyView { namespaces })
    }

    /// Every agent one agent is currently allowed to reach.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::AgentNotFound`] for unknown ids.
    pub fn get_agent_access(&self, agent_id: AgentId) -> Result<Vec<AgentSummary>, TopologyError> {
        let entry = self
            .registry
            .get(agent_id)?
            .ok_or(TopologyError::AgentNotFound { id: agent_id })?;
        let from = Subject::new(entry.subject())?;

        let mut reachable = Vec::new();
        for other in self.registry.list()? {
            if other.manifest.id == agent_id {
                continue;
            }
            let to = Subject::new(other.subject())?;
            if self.access.is_allowed(&from, &to) {
                reachable.push(AgentSummary::from(&other));
            }
        }
        Ok(reachable)
    }

    /// Open one direction of cross-namespace traffic. The reverse
    /// direction needs its own call.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] for invalid namespaces or rule-store
    /// failures.
    pub fn allow_cross_namespace(&self, src: &str, dst: &str) -> Result<(), TopologyError> {
        let (from, to) = cross_namespace_patterns(src, dst)?;
        self.access.add_rule(AccessRule {
            from,
            to,
            action: RuleAction::Allow,
            priority: CROSS_NAMESPACE_PRIORITY,
        })?;
        info!(src, dst, "cross-namespace traffic allowed");
        Ok(())
    }

    /// Withdraw one direction of cross-namespace traffic, restoring the
    /// default deny. Returns how many rules were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] for invalid namespaces or rule-store
    /// failures.
    pub fn deny_cross_namespace(&self, src: &str, dst: &str) -> Result<usize, TopologyError> {
        let (from, to) = cross_namespace_patterns(src, dst)?;
        let removed = self.access.remove_rules(&from, &to)?;
        info!(src, dst, removed, "cross-namespace traffic denied");
        Ok(removed)
    }
}

fn normalized(namespace: &str) -> Result<String, NamespaceError> {
    let normalized = namespace::normalize(namespace);
    namespace::validate(&normalized).map(|()| normalized)
}

fn probe_subject(namespace: &str) -> Result<Subject, SubjectError> {
    Subject::new(format!("relay.agent.{namespace}.any"))
}

fn cross_namespace_patterns(
    src: &str,
    dst: &str,
) -> Result<(SubjectPattern, SubjectPattern), TopologyError> {
    let src = normalized(src)?;
    let dst = normalized(dst)?;
    let from = SubjectPattern::new(format!("relay.agent.{src}.>"))?;
    let to = SubjectPattern::new(format!("relay.agent.{dst}.>"))?;
    Ok((from, to))
}
