//! Namespace derivation and normalisation.
//!
//! Namespaces are the default access-control boundary. An agent either
//! names its namespace in the manifest or inherits the first path
//! segment under the scan root; both forms normalise to
//! `[a-z0-9-]{1,64}`.

// Layer 1: Standard library imports
use std::path::{Component, Path};

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Longest accepted namespace after normalisation.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Failures deriving or validating a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// Nothing usable remained after normalisation.
    #[error("namespace {original:?} is empty after normalisation")]
    Empty {
        /// The input that normalised away.
        original: String,
    },

    /// Longer than [`MAX_NAMESPACE_LEN`].
    #[error("namespace {namespace:?} exceeds {MAX_NAMESPACE_LEN} characters")]
    TooLong {
        /// The oversized namespace.
        namespace: String,
    },

    /// The project path does not live under the scan root.
    #[error("project {project:?} is not under scan root {scan_root:?}")]
    OutsideScanRoot {
        /// The project path.
        project: String,
        /// The scan root.
        scan_root: String,
    },
}

/// Lowercase, collapse non-alphanumeric runs to single `-`, trim `-`.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Validate an already-normalised namespace.
///
/// # Errors
///
/// Returns [`NamespaceError`] for empty or oversized values.
pub fn validate(namespace: &str) -> Result<(), NamespaceError> {
    if namespace.is_empty() {
        return Err(NamespaceError::Empty {
            original: namespace.to_string(),
        });
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(NamespaceError::TooLong {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

/// Resolve the namespace for a project.
///
/// A manifest namespace wins when present (it is user-authored, so an
/// invalid one is an error, not a fallback). Otherwise the first path
/// segment of the project relative to the scan root is derived; a
/// project sitting directly at the root uses the root's own directory
/// name.
///
/// # Errors
///
/// Returns [`NamespaceError`] for invalid manifest namespaces, paths
/// outside the scan root, or values that normalise to nothing.
pub fn resolve(
    project: &Path,
    scan_root: &Path,
    manifest_namespace: Option<&str>,
) -> Result<String, NamespaceError> {
    if let Some(explicit) = manifest_namespace.filter(|ns| !ns.trim().is_empty()) {
        let normalized = normalize(explicit);
        if normalized.is_empty() {
            return Err(NamespaceError::Empty {
                original: explicit.to_string(),
            });
        }
        validate(&normalized)?;
        return Ok(normalized);
    }

    let derived = if project == scan_root {
        project
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    } else {
        project
            .strip_prefix(scan_root)
            .ok()
            .and_then(|relative| relative.components().next().map(component_to_string))
    };
    let Some(derived) = derived else {
        return Err(NamespaceError::OutsideScanRoot {
            project: project.display().to_string(),
            scan_root: scan_root.display().to_string(),
        });
    };

    let normalized = normalize(&derived);
    if normalized.is_empty() {
        return Err(NamespaceError::Empty { original: derived });
    }
    validate(&normalized)?;
    Ok(normalized)
}

fn component_to_string(component: Component<'_>) -> String {
    component.as_os_str().to_string_lossy().to_string()
}
