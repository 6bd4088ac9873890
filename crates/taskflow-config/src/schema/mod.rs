//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod events;
mod logging;
mod mesh;
mod presence;
mod server;

pub use events::*;
pub use logging::*;
pub use mesh::*;
pub use presence::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root configuration for the hub and its clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub events: EventsConfig,
    pub mesh: MeshConfig,
    pub logging: LoggingConfig,
}
