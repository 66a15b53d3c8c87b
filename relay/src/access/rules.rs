// Layer 1: Standard library imports
use std::cmp::Reverse;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use crate::index::{IndexError, SqliteIndex};
use crate::subject::{Subject, SubjectPattern};

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Permit the delivery.
    Allow,
    /// Refuse the delivery.
    Deny,
}

impl RuleAction {
    /// Stable lowercase name used in persistence and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Parse error for [`RuleAction`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rule action {0:?}")]
pub struct UnknownAction(pub String);

/// One access rule: who may talk to whom.
///
/// Degenerate patterns never get this far; both sides are validated
/// [`SubjectPattern`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// Pattern over the sender subject.
    pub from: SubjectPattern,
    /// Pattern over the target subject.
    pub to: SubjectPattern,
    /// What to do when both patterns match.
    pub action: RuleAction,
    /// Higher wins; ties resolve to deny.
    pub priority: i32,
}

/// Failures from the rule store.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Persisting or loading rules failed.
    #[error("access rule persistence failed: {0}")]
    Persistence(#[from] IndexError),
}

/// The seam Mesh (and other composers) use to consult and edit rules.
pub trait AccessRules: Send + Sync {
    /// Evaluate the rule table for one from/to pair.
    fn is_allowed(&self, from: &Subject, to: &Subject) -> bool;

    /// Append a rule and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when persistence fails; the in-memory
    /// table is left unchanged in that case.
    fn add_rule(&self, rule: AccessRule) -> Result<(), AccessError>;

    /// Remove every rule with exactly this from/to pattern pair.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when persistence fails.
    fn remove_rules(
        &self,
        from: &SubjectPattern,
        to: &SubjectPattern,
    ) -> Result<usize, AccessError>;

    /// Snapshot of the current rule table.
    fn rules(&self) -> Vec<AccessRule>;
}

/// Priority-ordered rule evaluation with namespace-relation defaults.
///
/// Matching rules are sorted by priority descending; among equal
/// priorities an explicit deny beats an allow. When nothing matches, the
/// default depends on the namespace relation of the two subjects: same
/// namespace (or either side without one) allows, different namespaces
/// deny. Rules persist in the message index and reload at startup.
pub struct AccessControl {
    rules: RwLock<Vec<AccessRule>>,
    index: Arc<SqliteIndex>,
}

impl AccessControl {
    /// Load the rule table persisted in `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when the stored rules cannot be read.
    pub fn load(index: Arc<SqliteIndex>) -> Result<Self, AccessError> {
        let rules = index.list_access_rules()?;
        Ok(Self {
            rules: RwLock::new(rules),
            index,
        })
    }

    /// Replace the whole rule table and persist the swap.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] when persistence fails; the in-memory
    /// table is left unchanged in that case.
    pub fn set_rules(&self, rules: Vec<AccessRule>) -> Result<(), AccessError> {
        self.index.replace_access_rules(&rules)?;
        *self.rules.write() = rules;
        Ok(())
    }

    fn default_action(from: &Subject, to: &Subject) -> bool {
        match (from.namespace(), to.namespace()) {
            // Namespaces are the default trust boundary; crossing one
            // needs an explicit allow rule.
            (Some(a), Some(b)) => a == b,
            // A side without a namespace is outside the boundary model.
            _ => true,
        }
    }
}

impl AccessRules for AccessControl {
    fn is_allowed(&self, from: &Subject, to: &Subject) -> bool {
        let rules = self.rules.read();
        let mut matched: Vec<&AccessRule> = rules
            .iter()
            .filter(|rule| rule.from.matches(from) && rule.to.matches(to))
            .collect();
        matched.sort_by_key(|rule| {
            (
                Reverse(rule.priority),
                match rule.action {
                    RuleAction::Deny => 0,
                    RuleAction::Allow => 1,
                },
            )
        });
        match matched.first() {
            Some(rule) => rule.action == RuleAction::Allow,
            None => Self::default_action(from, to),
        }
    }

    fn add_rule(&self, rule: AccessRule) -> Result<(), AccessError> {
        self.index.insert_access_rule(&rule)?;
        self.rules.write().push(rule);
        Ok(())
    }

    fn remove_rules(
        &self,
        from: &SubjectPattern,
        to: &SubjectPattern,
    ) -> Result<usize, AccessError> {
        let removed = self.index.delete_access_rules(from, to)?;
        self.rules
            .write()
            .retain(|rule| !(rule.from == *from && rule.to == *to));
        Ok(removed)
    }

    fn rules(&self) -> Vec<AccessRule> {
        self.rules.read().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn control() -> AccessControl {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        AccessControl::load(index).unwrap()
    }

    fn subject(s: &str) -> Subject {
        Subject::new(s).unwrap()
    }

    fn rule(from: &str, to: &str, action: RuleAction, priority: i32) -> AccessRule {
        AccessRule {
            from: SubjectPattern::new(from).unwrap(),
            to: SubjectPattern::new(to).unwrap(),
            action,
            priority,
        }
    }

    #[test]
    fn test_same_namespace_allowed_by_default() {
        let control = control();
        assert!(control.is_allowed(
            &subject("relay.agent.foo.a"),
            &subject("relay.agent.foo.b"),
        ));
    }

    #[test]
    fn test_cross_namespace_denied_by_default() {
        let control = control();
        assert!(!control.is_allowed(
            &subject("relay.agent.foo.a"),
            &subject("relay.agent.bar.b"),
        ));
    }

    #[test]
    fn test_namespace_less_sender_allowed_by_default() {
        let control = control();
        assert!(control.is_allowed(&subject("x"), &subject("relay.agent.alpha")));
    }

    #[test]
    fn test_allow_rule_opens_cross_namespace() {
        let control = control();
        control
            .add_rule(rule(
                "relay.agent.foo.>",
                "relay.agent.bar.>",
                RuleAction::Allow,
                100,
            ))
            .unwrap();

        assert!(control.is_allowed(
            &subject("relay.agent.foo.a"),
            &subject("relay.agent.bar.b"),
        ));
        // The reverse direction needs its own rule.
        assert!(!control.is_allowed(
            &subject("relay.agent.bar.b"),
            &subject("relay.agent.foo.a"),
        ));
    }

    #[test]
    fn test_higher_priority_wins() {
        let control = control();
        control
            .add_rule(rule("relay.agent.foo.>", "relay.agent.bar.>", RuleAction::Allow, 10))
            .unwrap();
        control
            .add_rule(rule("relay.agent.foo.spy", "relay.agent.bar.>", RuleAction::Deny, 20))
            .unwrap();

        assert!(control.is_allowed(
            &subject("relay.agent.foo.a"),
            &subject("relay.agent.bar.b"),
        ));
        assert!(!control.is_allowed(
            &subject("relay.agent.foo.spy"),
            &subject("relay.agent.bar.b"),
        ));
    }

    #[test]
    fn test_tie_resolves_to_deny() {
        let control = control();
        control
            .add_rule(rule("a.>", "b.>", RuleAction::Allow, 5))
            .unwrap();
        control
            .add_rule(rule("a.>", "b.>", RuleAction::Deny, 5))
            .unwrap();

        assert!(!control.is_allowed(&subject("a.x"), &subject("b.y")));
    }

    #[test]
    fn test_rules_persist_across_reload() {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        {
            let control = AccessControl::load(Arc::clone(&index)).unwrap();
            control
                .add_rule(rule("a.>", "b.>", RuleAction::Allow, 1))
                .unwrap();
        }
        let reloaded = AccessControl::load(index).unwrap();
        assert_eq!(reloaded.rules().len(), 1);
        assert!(reloaded.is_allowed(&subject("a.x"), &subject("b.y")));
    }

    #[test]
    fn test_set_rules_replaces_table() {
        let control = control();
        control
            .add_rule(rule("a.>", "b.>", RuleAction::Deny, 1))
            .unwrap();
        control
            .set_rules(vec![rule("c.>", "d.>", RuleAction::Allow, 1)])
            .unwrap();

        let rules = control.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].from.as_str(), "c.>");
    }

    #[test]
    fn test_remove_rules() {
        let control = control();
        let r = rule("a.>", "b.>", RuleAction::Allow, 1);
        control.add_rule(r.clone()).unwrap();
        let removed = control.remove_rules(&r.from, &r.to).unwrap();
        assert_eq!(removed, 1);
        assert!(control.rules().is_empty());
    }
}
