//! Mesh configuration with TOML loading.

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::discovery::ScanOptions;
use crate::registry::HealthThresholds;

/// Top-level Mesh configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    /// Agent registry database path.
    pub db_path: PathBuf,

    /// Discovery walk tuning.
    #[serde(default)]
    pub scan: ScanOptions,

    /// Paths never considered for discovery.
    #[serde(default)]
    pub denial_list: Vec<PathBuf>,

    /// Windows for the derived health status.
    #[serde(default)]
    pub health: HealthThresholds,
}

impl MeshConfig {
    /// A configuration persisting the registry at `db_path`, defaults
    /// everywhere else.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            scan: ScanOptions::default(),
            denial_list: Vec::new(),
            health: HealthThresholds::default(),
        }
    }

    /// Builder method: override the walk tuning.
    pub fn with_scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// Builder method: set the denial list.
    pub fn with_denial_list(mut self, denial_list: Vec<PathBuf>) -> Self {
        self.denial_list = denial_list;
        self
    }

    /// Builder method: override the health windows.
    pub fn with_health(mut self, health: HealthThresholds) -> Self {
        self.health = health;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.db_path.as_os_str().is_empty() {
            return Err("dbPath must not be empty".to_string());
        }
        if self.scan.max_depth == 0 {
            return Err("scan.max_depth must be > 0".to_string());
        }
        if self.health.active_within >= self.health.inactive_within {
            return Err("health.active_within must be below inactive_within".to_string());
        }
        Ok(())
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a description of the I/O, parse, or validation failure.
    pub async fn from_toml_path(path: &Path) -> Result<Self, String> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| format!("parse {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(MeshConfig::new("/var/lib/mesh.db").validate().is_ok());
    }

    #[test]
    fn test_inverted_health_windows_rejected() {
        let mut config = MeshConfig::new("/var/lib/mesh.db");
        config.health.active_within = config.health.inactive_within;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_toml_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.toml");
        tokio::fs::write(
            &path,
            r#"
dbPath = "/var/lib/mesh.db"
denialList = ["/tmp/secret"]

[scan]
max_depth = 2
exclude = [".git"]
follow_symlinks = false
"#,
        )
        .await
        .unwrap();

        let config = MeshConfig::from_toml_path(&path).await.unwrap();
        assert_eq!(config.scan.max_depth, 2);
        assert_eq!(config.denial_list, vec![PathBuf::from("/tmp/secret")]);
    }
}
