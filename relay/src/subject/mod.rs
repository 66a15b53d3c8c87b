//! Dot-segmented subjects and wildcard patterns.
//!
//! Subjects are the routing keys of the bus (`relay.agent.alpha.01H...`).
//! Patterns add two wildcards: `*` matches exactly one segment, `>` matches
//! one or more trailing segments and is only legal as the last segment.

mod error;
mod pattern;

pub use error::SubjectError;
pub use pattern::{Subject, SubjectPattern, AGENT_SUBJECT_PREFIX};
