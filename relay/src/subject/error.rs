// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Validation errors for subjects and subject patterns.
///
/// Degenerate forms are rejected at construction time so that routing
/// code never has to re-validate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    /// The subject or pattern string was empty.
    #[error("subject must not be empty")]
    Empty,

    /// A dot-separated segment was empty (`a..b`, leading or trailing dot).
    #[error("empty segment at position {position} in {subject:?}")]
    EmptySegment {
        /// Zero-based segment index.
        position: usize,
        /// The offending input.
        subject: String,
    },

    /// A concrete subject contained a wildcard segment.
    #[error("subject {subject:?} must not contain wildcard segment {segment:?}")]
    WildcardInSubject {
        /// The wildcard segment found.
        segment: String,
        /// The offending input.
        subject: String,
    },

    /// `>` appeared somewhere other than the final segment.
    #[error("multi-segment wildcard '>' must be the last segment in {pattern:?}")]
    InteriorMultiWildcard {
        /// The offending input.
        pattern: String,
    },
}
