use serde::{Deserialize, Serialize};

/// Listener settings for the hub's WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Seconds a new connection has to send its `hello` frame.
    pub hello_timeout_secs: u64,
    /// Frames buffered per connection. A client that falls this far behind
    /// is disconnected.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            hello_timeout_secs: 10,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
