// Layer 1: Standard library imports
use std::path::Path;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// What a strategy learned about a candidate directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryHints {
    /// Proposed agent name (usually the directory name).
    pub suggested_name: String,

    /// Optional description gleaned from the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Runtime tag of the recognising strategy.
    pub detected_runtime: String,

    /// Capability tags inferred from the project contents.
    #[serde(default)]
    pub inferred_capabilities: Vec<String>,
}

/// Answers whether a directory looks like an agent project.
///
/// Probing is pure filesystem inspection; strategies run inside the
/// scanner's blocking walk and must not do I/O beyond the directory
/// they are handed.
pub trait DiscoveryStrategy: Send + Sync {
    /// The runtime tag this strategy detects (`claude-code`, ...).
    fn runtime(&self) -> &'static str;

    /// Inspect a directory; `Some` means recognised.
    fn probe(&self, dir: &Path) -> Option<DiscoveryHints>;
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "agent".to_string())
}

/// Recognises Claude Code projects by their `CLAUDE.md` or `.claude/`
/// markers.
pub struct ClaudeCodeStrategy;

impl DiscoveryStrategy for ClaudeCodeStrategy {
    fn runtime(&self) -> &'static str {
        "claude-code"
    }

    fn probe(&self, dir: &Path) -> Option<DiscoveryHints> {
        let has_marker = dir.join("CLAUDE.md").is_file() || dir.join(".claude").is_dir();
        has_marker.then(|| DiscoveryHints {
            suggested_name: dir_name(dir),
            description: None,
            detected_runtime: self.runtime().to_string(),
            inferred_capabilities: vec!["code".to_string()],
        })
    }
}

/// Recognises Cursor projects by `.cursorrules` or `.cursor/`.
pub struct CursorStrategy;

impl DiscoveryStrategy for CursorStrategy {
    fn runtime(&self) -> &'static str {
        "cursor"
    }

    fn probe(&self, dir: &Path) -> Option<DiscoveryHints> {
        let has_marker = dir.join(".cursorrules").is_file() || dir.join(".cursor").is_dir();
        has_marker.then(|| DiscoveryHints {
            suggested_name: dir_name(dir),
            description: None,
            detected_runtime: self.runtime().to_string(),
            inferred_capabilities: vec!["code".to_string()],
        })
    }
}

/// Recognises Codex-style projects by their `AGENTS.md` marker.
pub struct CodexStrategy;

impl DiscoveryStrategy for CodexStrategy {
    fn runtime(&self) -> &'static str {
        "codex"
    }

    fn probe(&self, dir: &Path) -> Option<DiscoveryHints> {
        dir.join("AGENTS.md").is_file().then(|| DiscoveryHints {
            suggested_name: dir_name(dir),
            description: None,
            detected_runtime: self.runtime().to_string(),
            inferred_capabilities: vec!["code".to_string()],
        })
    }
}

/// The built-in strategy set, probed in order.
pub fn default_strategies() -> Vec<Arc<dyn DiscoveryStrategy>> {
    vec![
        Arc::new(ClaudeCodeStrategy),
        Arc::new(CursorStrategy),
        Arc::new(CodexStrategy),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claude_code_markers() {
        let dir = TempDir::new().unwrap();
        assert!(ClaudeCodeStrategy.probe(dir.path()).is_none());

        std::fs::write(dir.path().join("CLAUDE.md"), "# agent").unwrap();
        let hints = ClaudeCodeStrategy.probe(dir.path()).unwrap();
        assert_eq!(hints.detected_runtime, "claude-code");
        assert_eq!(
            hints.suggested_name,
            dir.path().file_name().unwrap().to_string_lossy()
        );
    }

    #[test]
    fn test_cursor_markers() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".cursor")).unwrap();
        let hints = CursorStrategy.probe(dir.path()).unwrap();
        assert_eq!(hints.detected_runtime, "cursor");
    }

    #[test]
    fn test_codex_markers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "# agents").unwrap();
        let hints = CodexStrategy.probe(dir.path()).unwrap();
        assert_eq!(hints.detected_runtime, "codex");
    }

    #[test]
    fn test_default_strategy_order() {
        let strategies = default_strategies();
        let runtimes: Vec<&str> = strategies.iter().map(|s| s.runtime()).collect();
        assert_eq!(runtimes, vec!["claude-code", "cursor", "codex"]);
    }
}
