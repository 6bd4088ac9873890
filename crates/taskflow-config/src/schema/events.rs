use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chat event fanout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// How long a receiver shows a typing indicator after the last ping.
    pub typing_timeout_ms: u64,
    /// Messages kept per channel by client timelines.
    pub history_per_channel: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            typing_timeout_ms: 3000,
            history_per_channel: 500,
        }
    }
}

impl EventsConfig {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}
