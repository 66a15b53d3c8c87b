// Layer 1: Standard library imports
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::types::AgentManifest;

const MANIFEST_DIR: &str = ".dork";
const MANIFEST_FILE: &str = "agent.json";

/// Failures reading or writing agent manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No manifest exists at this project path.
    #[error("no manifest at {path}")]
    NotFound {
        /// The missing manifest path.
        path: PathBuf,
    },

    /// Filesystem failure.
    #[error("{op} failed for {path}: {source}")]
    Io {
        /// Short operation name.
        op: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not parse as a manifest.
    #[error("manifest {path} is corrupt: {source}")]
    Corrupt {
        /// The unparseable file.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest parsed but failed validation.
    #[error("manifest {path} is invalid: {reason}")]
    Invalid {
        /// The offending file.
        path: PathBuf,
        /// First invalid field.
        reason: String,
    },
}

/// The manifest path for a project directory.
pub fn manifest_path(project: &Path) -> PathBuf {
    project.join(MANIFEST_DIR).join(MANIFEST_FILE)
}

/// Whether a project carries a manifest.
pub async fn manifest_exists(project: &Path) -> bool {
    tokio::fs::metadata(manifest_path(project))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Read and validate `<project>/.dork/agent.json`.
///
/// # Errors
///
/// Returns [`ManifestError`] for missing, unreadable, unparseable, or
/// invalid manifests.
pub async fn read_manifest(project: &Path) -> Result<AgentManifest, ManifestError> {
    let path = manifest_path(project);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManifestError::NotFound { path })
        }
        Err(e) => {
            return Err(ManifestError::Io {
                op: "read",
                path,
                source: e,
            })
        }
    };
    let manifest: AgentManifest =
        serde_json::from_slice(&bytes).map_err(|source| ManifestError::Corrupt {
            path: path.clone(),
            source,
        })?;
    manifest
        .validate()
        .map_err(|reason| ManifestError::Invalid { path, reason })?;
    Ok(manifest)
}

/// Atomically write `<project>/.dork/agent.json` (temp file + rename).
///
/// # Errors
///
/// Returns [`ManifestError`] for invalid manifests or filesystem
/// failures.
pub async fn write_manifest(project: &Path, manifest: &AgentManifest) -> Result<(), ManifestError> {
    let path = manifest_path(project);
    manifest
        .validate()
        .map_err(|reason| ManifestError::Invalid {
            path: path.clone(),
            reason,
        })?;

    let dir = project.join(MANIFEST_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ManifestError::Io {
            op: "create_dir",
            path: dir.clone(),
            source: e,
        })?;

    let bytes = serde_json::to_vec_pretty(manifest).map_err(|source| ManifestError::Corrupt {
        path: path.clone(),
        source,
    })?;
    let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| ManifestError::Io {
            op: "write",
            path: tmp.clone(),
            source: e,
        })?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| ManifestError::Io {
            op: "rename",
            path: tmp,
            source: e,
        })?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let manifest = AgentManifest::new("summarizer", "claude-code");
        write_manifest(dir.path(), &manifest).await.unwrap();

        assert!(manifest_exists(dir.path()).await);
        let read = read_manifest(dir.path()).await.unwrap();
        assert_eq!(read, manifest);

        // No temp residue.
        assert!(!dir.path().join(".dork/agent.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_manifest(dir.path()).await,
            Err(ManifestError::NotFound { .. })
        ));
        assert!(!manifest_exists(dir.path()).await);
    }

    #[tokio::test]
    async fn test_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join(".dork"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(".dork/agent.json"), b"{not json")
            .await
            .unwrap();
        assert!(matches!(
            read_manifest(dir.path()).await,
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_manifest_rejected_on_write() {
        let dir = TempDir::new().unwrap();
        let mut manifest = AgentManifest::new("x", "codex");
        manifest.name = String::new();
        assert!(matches!(
            write_manifest(dir.path(), &manifest).await,
            Err(ManifestError::Invalid { .. })
        ));
        assert!(!manifest_exists(dir.path()).await);
    }

    #[tokio::test]
    async fn test_unknown_fields_survive_rewrite() {
        let dir = TempDir::new().unwrap();
        let mut manifest = AgentManifest::new("x", "codex");
        manifest.extra.insert(
            "annotations".to_string(),
            serde_json::json!({"team": "infra"}),
        );
        write_manifest(dir.path(), &manifest).await.unwrap();

        let mut read = read_manifest(dir.path()).await.unwrap();
        read.description = Some("edited".to_string());
        write_manifest(dir.path(), &read).await.unwrap();

        let again = read_manifest(dir.path()).await.unwrap();
        assert_eq!(again.extra["annotations"]["team"], "infra");
        assert_eq!(again.description.as_deref(), Some("edited"));
    }
}
