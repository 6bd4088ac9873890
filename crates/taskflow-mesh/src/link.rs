use async_trait::async_trait;
use taskflow_common::{ChatEvent, ConnectionHandle, MeshError, Signal};

/// Outbound half of a hub connection, as seen by client-side components.
#[async_trait]
pub trait HubLink: Send + Sync {
    /// Enter a voice channel. Identity comes from the connection's `hello`.
    async fn join_voice(&self, channel: &str, muted: bool) -> Result<(), MeshError>;
    async fn leave_voice(&self, channel: &str) -> Result<(), MeshError>;
    async fn relay_signal(
        &self,
        channel: &str,
        to: &ConnectionHandle,
        signal: Signal,
    ) -> Result<(), MeshError>;
    async fn subscribe(&self, channel: &str) -> Result<(), MeshError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), MeshError>;
    async fn publish(&self, channel: &str, event: ChatEvent) -> Result<(), MeshError>;
    async fn set_mute(&self, channel: &str, muted: bool) -> Result<(), MeshError>;
}
