//! Priority-ordered allow/deny rules over from/to subject pairs.

mod rules;

pub use rules::{AccessControl, AccessError, AccessRule, AccessRules, RuleAction, UnknownAction};
