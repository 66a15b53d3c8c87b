// Layer 1: Standard library imports
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

// Layer 3: Internal module imports
use super::strategy::{DiscoveryHints, DiscoveryStrategy};
use crate::manifest::{manifest_path, AgentManifest};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Walk tuning for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Directory depth bound below the scan root.
    pub max_depth: usize,

    /// Directory names never descended into.
    pub exclude: Vec<String>,

    /// Whether to follow symlinks (off unless explicitly enabled).
    pub follow_symlinks: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: 4,
            exclude: [
                ".git",
                ".hg",
                "node_modules",
                "target",
                "dist",
                "build",
                ".next",
                "vendor",
                "__pycache__",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            follow_symlinks: false,
        }
    }
}

/// One discovery finding, streamed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// The directory already carries a valid `.dork/agent.json`; hand it
    /// back for upsert without user intent.
    AutoImport {
        /// The validated manifest.
        manifest: AgentManifest,
        /// The project directory.
        path: PathBuf,
    },

    /// A strategy recognised the directory and it is neither denied nor
    /// already registered.
    Candidate {
        /// The project directory.
        path: PathBuf,
        /// What the strategy learned.
        hints: DiscoveryHints,
    },
}

/// Walk one scan root, streaming findings over a channel.
///
/// The walk runs on a blocking thread; the caller drains the returned
/// receiver. Recognised project directories are not descended into.
/// Errors on individual paths are logged and skipped - a broken subtree
/// never aborts the walk.
pub fn scan_directory(
    root: PathBuf,
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    known_paths: HashSet<PathBuf>,
    denial_list: HashSet<PathBuf>,
    options: ScanOptions,
) -> mpsc::Receiver<DiscoveryEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        walk(&root, &strategies, &known_paths, &denial_list, &options, &tx);
    });
    rx
}

fn walk(
    root: &Path,
    strategies: &[Arc<dyn DiscoveryStrategy>],
    known_paths: &HashSet<PathBuf>,
    denial_list: &HashSet<PathBuf>,
    options: &ScanOptions,
    tx: &mpsc::Sender<DiscoveryEvent>,
) {
    let mut iter = WalkDir::new(root)
        .max_depth(options.max_depth)
        .follow_links(options.follow_symlinks)
        .into_iter();

    while let Some(entry) = iter.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path during scan");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();

        if entry.depth() > 0 {
            let name = entry.file_name().to_string_lossy();
            if options.exclude.iter().any(|excluded| excluded == &*name) {
                iter.skip_current_dir();
                continue;
            }
        }
        if denial_list.contains(path) {
            debug!(path = %path.display(), "skipping denied path");
            iter.skip_current_dir();
            continue;
        }

        // A directory that already carries a manifest is an existing
        // agent: validate and hand it back for upsert.
        if manifest_path(path).is_file() {
            match read_manifest_blocking(path) {
                Ok(manifest) => {
                    let event = DiscoveryEvent::AutoImport {
                        manifest,
                        path: path.to_path_buf(),
                    };
                    if tx.blocking_send(event).is_err() {
                        return; // caller stopped draining
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable manifest skipped"),
            }
            iter.skip_current_dir();
            continue;
        }

        if let Some(hints) = strategies.iter().find_map(|s| s.probe(path)) {
            if !known_paths.contains(path) {
                let event = DiscoveryEvent::Candidate {
                    path: path.to_path_buf(),
                    hints,
                };
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }
            iter.skip_current_dir();
        }
    }
}

/// Synchronous manifest read for the blocking walk.
fn read_manifest_blocking(project: &Path) -> Result<AgentManifest, String> {
    let path = manifest_path(project);
    let bytes = std::fs::read(&path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let manifest: AgentManifest =
        serde_json::from_slice(&bytes).map_err(|e| format!("parse {}: {e}", path.display()))?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::discovery::strategy::default_strategies;
    use crate::manifest::write_manifest;
    use tempfile::TempDir;

    async fn drain(mut rx: mpsc::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn make_candidate(root: &Path, rel: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("CLAUDE.md"), "# agent").unwrap();
    }

    #[tokio::test]
    async fn test_candidates_and_auto_imports() {
        let root = TempDir::new().unwrap();
        make_candidate(root.path(), "team-a/fresh");

        let imported_dir = root.path().join("team-b/existing");
        std::fs::create_dir_all(&imported_dir).unwrap();
        let manifest = AgentManifest::new("existing", "claude-code");
        write_manifest(&imported_dir, &manifest).await.unwrap();

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            HashSet::new(),
            HashSet::new(),
            ScanOptions::default(),
        ))
        .await;

        assert_eq!(events.len(), 2);
        let candidates: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Candidate { .. }))
            .collect();
        assert_eq!(candidates.len(), 1);
        let imports: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::AutoImport { manifest, .. } => Some(manifest),
                DiscoveryEvent::Candidate { .. } => None,
            })
            .collect();
        assert_eq!(imports[0].id, manifest.id);
    }

    #[tokio::test]
    async fn test_known_paths_are_not_candidates() {
        let root = TempDir::new().unwrap();
        make_candidate(root.path(), "team-a/known");

        let mut known = HashSet::new();
        known.insert(root.path().join("team-a/known"));

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            known,
            HashSet::new(),
            ScanOptions::default(),
        ))
        .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_denial_list_skips_subtree() {
        let root = TempDir::new().unwrap();
        make_candidate(root.path(), "denied/agent");

        let mut denial = HashSet::new();
        denial.insert(root.path().join("denied"));

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            HashSet::new(),
            denial,
            ScanOptions::default(),
        ))
        .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_directories_not_descended() {
        let root = TempDir::new().unwrap();
        make_candidate(root.path(), "node_modules/sneaky");
        make_candidate(root.path(), "team/real");

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            HashSet::new(),
            HashSet::new(),
            ScanOptions::default(),
        ))
        .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            DiscoveryEvent::Candidate { path, .. } => {
                assert!(path.ends_with("team/real"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_depth_bound() {
        let root = TempDir::new().unwrap();
        make_candidate(root.path(), "a/b/c/d/e/too-deep");

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            HashSet::new(),
            HashSet::new(),
            ScanOptions {
                max_depth: 3,
                ..ScanOptions::default()
            },
        ))
        .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_manifest_skipped_not_fatal() {
        let root = TempDir::new().unwrap();
        let broken = root.path().join("team/broken");
        std::fs::create_dir_all(broken.join(".dork")).unwrap();
        std::fs::write(broken.join(".dork/agent.json"), b"{oops").unwrap();
        make_candidate(root.path(), "team/healthy");

        let events = drain(scan_directory(
            root.path().to_path_buf(),
            default_strategies(),
            HashSet::new(),
            HashSet::new(),
            ScanOptions::default(),
        ))
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DiscoveryEvent::Candidate { .. }));
    }
}
