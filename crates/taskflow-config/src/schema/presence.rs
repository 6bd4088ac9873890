use serde::{Deserialize, Serialize};

/// Voice presence limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Maximum participants in one voice channel. `0` means unlimited.
    pub max_participants_per_channel: usize,
}
