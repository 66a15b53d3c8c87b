// Layer 1: Standard library imports
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use tracing::warn;

// Layer 3: Internal module imports
use super::error::AdapterError;
use super::registry::AdapterRegistry;
use super::traits::ChannelAdapter;
use super::webhook::WebhookAdapter;
use crate::core::Publisher;

/// Where a non-builtin adapter comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSource {
    /// Module/package name to resolve through the external loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Filesystem path to the plugin (relative paths resolve against
    /// the config directory before they get here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// One adapter entry in the relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfigEntry {
    /// Adapter id; must match what the instance reports.
    pub id: String,

    /// Factory key for builtin adapters.
    #[serde(rename = "type")]
    pub adapter_type: String,

    /// Disabled entries are skipped without error.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Force resolution through the builtin factory map.
    #[serde(default)]
    pub builtin: bool,

    /// External plugin source; takes precedence over the factory map
    /// when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginSource>,

    /// Adapter-specific configuration, passed to the factory verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// Factory producing an adapter from its config value.
pub type AdapterFactory =
    Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn ChannelAdapter>, AdapterError> + Send + Sync>;

/// Pluggable source of non-builtin adapters.
///
/// The builtin factory map is the first-party fast path; anything else
/// (dynamic libraries, out-of-process bridges) plugs in here.
pub trait AdapterLoader: Send + Sync {
    /// Resolve and instantiate an adapter from a plugin source.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the source cannot be resolved or
    /// the instance cannot be built.
    fn load(
        &self,
        entry: &AdapterConfigEntry,
        source: &PluginSource,
    ) -> Result<Arc<dyn ChannelAdapter>, AdapterError>;
}

/// Outcome of a config-driven load pass.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids registered successfully.
    pub loaded: Vec<String>,
    /// Ids skipped, with the reason (disabled, bad shape, start failure).
    pub skipped: Vec<(String, String)>,
}

/// Resolves adapter config entries to running instances.
///
/// Resolution order per entry: an explicit `plugin` source goes through
/// the external loader; everything else hits the builtin factory map by
/// `type`. Failures abort only the offending entry - other adapters
/// still load.
pub struct AdapterCatalog {
    builtin: HashMap<String, AdapterFactory>,
    external: Option<Arc<dyn AdapterLoader>>,
}

impl AdapterCatalog {
    /// An empty catalog with no factories.
    pub fn new() -> Self {
        Self {
            builtin: HashMap::new(),
            external: None,
        }
    }

    /// The catalog with all first-party adapters registered.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register_builtin("webhook", |config| {
            WebhookAdapter::from_config(config).map(|a| Arc::new(a) as Arc<dyn ChannelAdapter>)
        });
        catalog
    }

    /// Register a builtin factory under a `type` key.
    pub fn register_builtin<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(serde_json::Value) -> Result<Arc<dyn ChannelAdapter>, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        self.builtin.insert(type_name.to_string(), Arc::new(factory));
    }

    /// Wire an external plugin loader.
    pub fn set_external_loader(&mut self, loader: Arc<dyn AdapterLoader>) {
        self.external = Some(loader);
    }

    /// Instantiate one entry (without starting it).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] for unknown types, missing loaders, bad
    /// config, or shape validation failures.
    pub fn instantiate(
        &self,
        entry: &AdapterConfigEntry,
    ) -> Result<Arc<dyn ChannelAdapter>, AdapterError> {
        let adapter = if let Some(source) = entry.plugin.as_ref().filter(|_| !entry.builtin) {
            let loader = self
                .external
                .as_ref()
                .ok_or_else(|| AdapterError::NoExternalLoader {
                    id: entry.id.clone(),
                })?;
            loader.load(entry, source)?
        } else {
            let factory =
                self.builtin
                    .get(&entry.adapter_type)
                    .ok_or_else(|| AdapterError::UnknownType {
                        type_name: entry.adapter_type.clone(),
                    })?;
            factory(entry.config.clone())?
        };
        validate_shape(&entry.id, adapter.as_ref())?;
        Ok(adapter)
    }

    /// Instantiate, start, and register every enabled entry.
    ///
    /// Per-entry failures are collected into the report and logged;
    /// they never stop the remaining entries from loading.
    pub async fn load_all(
        &self,
        entries: &[AdapterConfigEntry],
        registry: &AdapterRegistry,
        publisher: Arc<dyn Publisher>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for entry in entries {
            if !entry.enabled {
                report
                    .skipped
                    .push((entry.id.clone(), "disabled".to_string()));
                continue;
            }
            let adapter = match self.instantiate(entry) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "adapter failed to load");
                    report.skipped.push((entry.id.clone(), e.to_string()));
                    continue;
                }
            };
            match registry.register(adapter, Arc::clone(&publisher)).await {
                Ok(()) => report.loaded.push(entry.id.clone()),
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "adapter failed to start");
                    report.skipped.push((entry.id.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Post-instantiation shape validation.
///
/// The trait guarantees the members exist; what can still go wrong is an
/// instance reporting empty identity or a prefix that cannot route.
fn validate_shape(entry_id: &str, adapter: &dyn ChannelAdapter) -> Result<(), AdapterError> {
    if adapter.id().is_empty() {
        return Err(AdapterError::InvalidShape {
            id: entry_id.to_string(),
            detail: "empty id".to_string(),
        });
    }
    if adapter.subject_prefix().is_empty() {
        return Err(AdapterError::InvalidShape {
            id: adapter.id().to_string(),
            detail: "empty subject prefix".to_string(),
        });
    }
    if adapter.id() != entry_id {
        warn!(
            entry = entry_id,
            adapter = adapter.id(),
            "adapter id differs from config entry id"
        );
    }
    Ok(())
}
