//! MeshCore and the bridge into the bus.

mod bridge;
mod mesh;

pub use bridge::{BridgeError, RelayBridge};
pub use mesh::{MeshCore, MeshError, RegisterOverrides};
