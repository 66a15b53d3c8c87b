//! External channel adapters and their lifecycle.
//!
//! An adapter carries envelopes out of the bus onto some external
//! transport (webhook, chat bridge, ...). The registry owns running
//! instances and implements the hot-reload contract: a replacement is
//! started before it is swapped in, and the previous instance is only
//! stopped after the swap. The loader resolves adapter config entries
//! against a built-in factory map, with a pluggable seam for external
//! plugin sources.

mod error;
mod loader;
mod registry;
mod traits;
mod webhook;

pub use error::AdapterError;
pub use loader::{AdapterCatalog, AdapterConfigEntry, AdapterFactory, AdapterLoader, LoadReport, PluginSource};
pub use registry::{AdapterInfo, AdapterRegistry};
pub use traits::{AdapterManifest, AdapterState, AdapterStatus, ChannelAdapter};
pub use webhook::{WebhookAdapter, WebhookConfig};
