//! Relay configuration with TOML loading and sensible defaults.

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::adapter::AdapterConfigEntry;
use crate::reliability::ReliabilityConfig;
use crate::signal::DEFAULT_SIGNAL_CAPACITY;

/// Top-level bus configuration.
///
/// One config - and therefore one root directory and one index file -
/// belongs to exactly one `RelayCore` instance per process.
///
/// # Example
/// ```rust
/// use dork_relay::config::RelayConfig;
///
/// let config = RelayConfig::new("/var/lib/relay");
/// assert!(config.validate().is_ok());
/// assert!(config.index_path().ends_with("relay.db"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Root directory; mailboxes live under `<root>/mailboxes`.
    pub root: PathBuf,

    /// Index database path; defaults to `<root>/relay.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,

    /// Reliability knobs (backpressure, breakers, rate limits).
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Channel adapter entries loaded at startup.
    #[serde(default)]
    pub adapters: Vec<AdapterConfigEntry>,

    /// Signal broadcast buffer capacity.
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

fn default_signal_capacity() -> usize {
    DEFAULT_SIGNAL_CAPACITY
}

impl RelayConfig {
    /// A configuration rooted at `root` with defaults everywhere else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_path: None,
            reliability: ReliabilityConfig::default(),
            adapters: Vec::new(),
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }

    /// Builder method: override the reliability knobs.
    pub fn with_reliability(mut self, reliability: ReliabilityConfig) -> Self {
        self.reliability = reliability;
        self
    }

    /// Builder method: set the adapter entries.
    pub fn with_adapters(mut self, adapters: Vec<AdapterConfigEntry>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Builder method: place the index database elsewhere.
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// The effective index database path.
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.root.join("relay.db"))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("root must not be empty".to_string());
        }
        if self.signal_capacity == 0 {
            return Err("signal_capacity must be > 0".to_string());
        }
        self.reliability.validate()
    }

    /// Load from a TOML file. Relative plugin paths in adapter entries
    /// resolve against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns a description of the I/O, parse, or validation failure.
    pub async fn from_toml_path(path: &Path) -> Result<Self, String> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        let mut config: Self =
            toml::from_str(&text).map_err(|e| format!("parse {}: {e}", path.display()))?;

        if let Some(config_dir) = path.parent() {
            for entry in &mut config.adapters {
                if let Some(plugin) = entry.plugin.as_mut() {
                    if let Some(plugin_path) = plugin.path.as_mut() {
                        if plugin_path.is_relative() {
                            *plugin_path = config_dir.join(&*plugin_path);
                        }
                    }
                }
            }
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::new("/tmp/relay");
        assert!(config.validate().is_ok());
        assert_eq!(config.index_path(), PathBuf::from("/tmp/relay/relay.db"));
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_index_path_override() {
        let config = RelayConfig::new("/tmp/relay").with_index_path("/elsewhere/index.db");
        assert_eq!(config.index_path(), PathBuf::from("/elsewhere/index.db"));
    }

    #[tokio::test]
    async fn test_toml_round_trip_with_relative_plugin_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("relay.toml");
        tokio::fs::write(
            &config_path,
            r#"
root = "/var/lib/relay"
signalCapacity = 64

[reliability.backpressure]
max_mailbox_size = 10
pressure_warning_at = 0.5

[[adapters]]
id = "hook"
type = "webhook"

[adapters.plugin]
path = "plugins/hook.so"
"#,
        )
        .await
        .unwrap();

        let config = RelayConfig::from_toml_path(&config_path).await.unwrap();
        assert_eq!(config.signal_capacity, 64);
        assert_eq!(config.reliability.backpressure.max_mailbox_size, 10);
        let plugin = config.adapters[0].plugin.as_ref().unwrap();
        assert_eq!(
            plugin.path.as_ref().unwrap(),
            &dir.path().join("plugins/hook.so")
        );
    }

    #[test]
    fn test_invalid_reliability_rejected() {
        let mut config = RelayConfig::new("/tmp/relay");
        config.reliability.backpressure.max_mailbox_size = 0;
        assert!(config.validate().is_err());
    }
}
