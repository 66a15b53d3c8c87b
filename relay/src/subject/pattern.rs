// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::error::SubjectError;

/// Prefix under which agent endpoints are addressed.
///
/// Agent endpoint subjects take the form `relay.agent.<namespace>.<id>`;
/// the third segment carries the namespace used for default access-control
/// decisions.
pub const AGENT_SUBJECT_PREFIX: &str = "relay.agent";

/// A validated, concrete routing key.
///
/// Subjects are dot-segmented, case-sensitive strings. Every segment is
/// non-empty and wildcards are rejected: a subject addresses exactly one
/// thing. Matching against wildcards is the job of [`SubjectPattern`].
///
/// # Example
/// ```rust
/// use dork_relay::subject::Subject;
///
/// let subject: Subject = "relay.agent.alpha.worker".parse().unwrap();
/// assert_eq!(subject.namespace(), Some("alpha"));
/// assert!("relay.agent.*".parse::<Subject>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Validate and construct a subject.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectError`] for empty input, empty segments, or
    /// wildcard segments.
    pub fn new(subject: impl Into<String>) -> Result<Self, SubjectError> {
        let subject = subject.into();
        validate_segments(&subject)?;
        for segment in subject.split('.') {
            if segment == "*" || segment == ">" {
                return Err(SubjectError::WildcardInSubject {
                    segment: segment.to_string(),
                    subject: subject.clone(),
                });
            }
        }
        Ok(Self(subject))
    }

    /// The subject as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The namespace segment of an agent subject.
    ///
    /// Returns `Some(namespace)` for subjects of the form
    /// `relay.agent.<namespace>[.<rest>...]`, `None` otherwise. Subjects
    /// outside the agent prefix have no namespace and are exempt from the
    /// cross-namespace default deny.
    pub fn namespace(&self) -> Option<&str> {
        let mut segments = self.0.split('.');
        if segments.next() != Some("relay") || segments.next() != Some("agent") {
            return None;
        }
        segments.next()
    }
}

impl FromStr for Subject {
    type Err = SubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Subject {
    type Error = SubjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated wildcard pattern over subjects.
///
/// `*` matches exactly one segment; `>` matches one or more trailing
/// segments and is only accepted as the final segment. A pattern without
/// wildcards matches exactly one subject.
///
/// # Example
/// ```rust
/// use dork_relay::subject::{Subject, SubjectPattern};
///
/// let pattern: SubjectPattern = "relay.agent.*.>".parse().unwrap();
/// let subject: Subject = "relay.agent.alpha.worker.inbox".parse().unwrap();
/// assert!(pattern.matches(&subject));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectPattern(String);

impl SubjectPattern {
    /// Validate and construct a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectError`] for empty input, empty segments, or a `>`
    /// in non-terminal position.
    pub fn new(pattern: impl Into<String>) -> Result<Self, SubjectError> {
        let pattern = pattern.into();
        validate_segments(&pattern)?;
        let segments: Vec<&str> = pattern.split('.').collect();
        for (index, segment) in segments.iter().enumerate() {
            if *segment == ">" && index + 1 != segments.len() {
                return Err(SubjectError::InteriorMultiWildcard {
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(Self(pattern))
    }

    /// The pattern as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this pattern matches the given subject.
    ///
    /// Matching is case-sensitive and segment-wise: `*` consumes exactly
    /// one segment, a terminal `>` consumes one or more.
    pub fn matches(&self, subject: &Subject) -> bool {
        self.matches_str(subject.as_str())
    }

    /// Segment-wise match against a raw subject string.
    pub fn matches_str(&self, subject: &str) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let segments: Vec<&str> = subject.split('.').collect();

        for (index, part) in pattern.iter().enumerate() {
            if *part == ">" {
                // Terminal by construction; needs at least one segment left.
                return segments.len() > index;
            }
            match segments.get(index) {
                Some(segment) if *part == "*" || part == segment => {}
                _ => return false,
            }
        }
        pattern.len() == segments.len()
    }
}

impl FromStr for SubjectPattern {
    type Err = SubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubjectPattern {
    type Error = SubjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectPattern> for String {
    fn from(pattern: SubjectPattern) -> Self {
        pattern.0
    }
}

impl From<Subject> for SubjectPattern {
    /// Every concrete subject is also a (wildcard-free) pattern.
    fn from(subject: Subject) -> Self {
        Self(subject.0)
    }
}

impl Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_segments(input: &str) -> Result<(), SubjectError> {
    if input.is_empty() {
        return Err(SubjectError::Empty);
    }
    for (position, segment) in input.split('.').enumerate() {
        if segment.is_empty() {
            return Err(SubjectError::EmptySegment {
                position,
                subject: input.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subject(s: &str) -> Subject {
        Subject::new(s).unwrap()
    }

    fn pattern(p: &str) -> SubjectPattern {
        SubjectPattern::new(p).unwrap()
    }

    #[test]
    fn test_subject_rejects_empty() {
        assert_eq!(Subject::new(""), Err(SubjectError::Empty));
    }

    #[test]
    fn test_subject_rejects_empty_segment() {
        assert!(matches!(
            Subject::new("a..b"),
            Err(SubjectError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            Subject::new(".a"),
            Err(SubjectError::EmptySegment { position: 0, .. })
        ));
        assert!(matches!(
            Subject::new("a."),
            Err(SubjectError::EmptySegment { position: 1, .. })
        ));
    }

    #[test]
    fn test_subject_rejects_wildcards() {
        assert!(matches!(
            Subject::new("relay.*.alpha"),
            Err(SubjectError::WildcardInSubject { .. })
        ));
        assert!(matches!(
            Subject::new("relay.agent.>"),
            Err(SubjectError::WildcardInSubject { .. })
        ));
    }

    #[test]
    fn test_pattern_rejects_interior_multi_wildcard() {
        assert!(matches!(
            SubjectPattern::new("a.>.b"),
            Err(SubjectError::InteriorMultiWildcard { .. })
        ));
        assert!(SubjectPattern::new("a.b.>").is_ok());
    }

    #[test]
    fn test_exact_match() {
        assert!(pattern("relay.agent.alpha").matches(&subject("relay.agent.alpha")));
        assert!(!pattern("relay.agent.alpha").matches(&subject("relay.agent.beta")));
        assert!(!pattern("relay.agent.alpha").matches(&subject("relay.agent.alpha.x")));
    }

    #[test]
    fn test_single_wildcard_matches_exactly_one_segment() {
        let p = pattern("relay.*.alpha");
        assert!(p.matches(&subject("relay.agent.alpha")));
        assert!(!p.matches(&subject("relay.alpha")));
        assert!(!p.matches(&subject("relay.a.b.alpha")));
    }

    #[test]
    fn test_trailing_wildcard_matches_one_or_more() {
        let p = pattern("relay.agent.>");
        assert!(p.matches(&subject("relay.agent.alpha")));
        assert!(p.matches(&subject("relay.agent.alpha.worker.inbox")));
        // `>` requires at least one trailing segment.
        assert!(!p.matches_str("relay.agent"));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(!pattern("relay.Agent.*").matches(&subject("relay.agent.alpha")));
    }

    #[test]
    fn test_namespace_extraction() {
        assert_eq!(subject("relay.agent.alpha.worker").namespace(), Some("alpha"));
        assert_eq!(subject("relay.agent.alpha").namespace(), Some("alpha"));
        assert_eq!(subject("relay.agent").namespace(), None);
        assert_eq!(subject("telegram.chat.42").namespace(), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let s = subject("relay.agent.alpha");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"relay.agent.alpha\"");
        let back: Subject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);

        let invalid: Result<Subject, _> = serde_json::from_str("\"relay..agent\"");
        assert!(invalid.is_err());
    }
}
