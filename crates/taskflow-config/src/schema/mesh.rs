use serde::{Deserialize, Serialize};

/// Client-side peer mesh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// STUN/TURN URLs handed to the WebRTC engine.
    pub ice_servers: Vec<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}
