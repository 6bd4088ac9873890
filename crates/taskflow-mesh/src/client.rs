//! Public handle for a connection to the hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use taskflow_common::{
    ChatEvent, ClientMessage, ConnectionHandle, MeshError, ServerMessage, Signal,
};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::info;

use crate::connection::{reader_task, writer_task};
use crate::link::HubLink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle for one hub connection.
///
/// Commands are queued to a background writer task; frames from the hub
/// arrive on the receiver returned by [`HubClient::connect`].
#[derive(Clone)]
pub struct HubClient {
    handle: ConnectionHandle,
    command_tx: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<RwLock<bool>>,
}

impl HubClient {
    /// Connect, identify, and wait for the hub to assign a handle.
    pub async fn connect(
        url: &str,
        user_id: &str,
        display_name: &str,
        avatar: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), MeshError> {
        info!(url, "Connecting to hub");
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| MeshError::HubUnavailable("connection timed out".into()))?
            .map_err(|e| MeshError::HubUnavailable(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let hello = ClientMessage::Hello {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            avatar,
        };
        let json = serde_json::to_string(&hello)
            .map_err(|e| MeshError::HubUnavailable(e.to_string()))?;
        write
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| MeshError::HubUnavailable(e.to_string()))?;

        let handle = loop {
            let frame = tokio::time::timeout(CONNECT_TIMEOUT, read.next())
                .await
                .map_err(|_| MeshError::HubUnavailable("no welcome from hub".into()))?;
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(ServerMessage::Welcome { handle }) => break handle,
                        Ok(ServerMessage::Error { message }) => {
                            return Err(MeshError::HubUnavailable(message))
                        }
                        Ok(other) => {
                            tracing::debug!(frame = ?other, "Frame before welcome ignored")
                        }
                        Err(e) => return Err(MeshError::HubUnavailable(e.to_string())),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(MeshError::HubUnavailable("closed before welcome".into()))
                }
                Some(Err(e)) => return Err(MeshError::HubUnavailable(e.to_string())),
                Some(Ok(_)) => {}
            }
        };
        info!(handle = %handle, "Connected to hub");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(RwLock::new(true));

        tokio::spawn(writer_task(write, command_rx));
        tokio::spawn(reader_task(read, event_tx, Arc::clone(&connected)));

        let client = Self {
            handle,
            command_tx,
            connected,
        };
        Ok((client, event_rx))
    }

    /// The handle the hub assigned to this connection.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Queue a raw frame for the hub.
    pub fn send(&self, msg: ClientMessage) -> Result<(), MeshError> {
        self.command_tx
            .send(msg)
            .map_err(|_| MeshError::HubUnavailable("connection closed".into()))
    }
}

#[async_trait]
impl HubLink for HubClient {
    async fn join_voice(&self, channel: &str, muted: bool) -> Result<(), MeshError> {
        self.send(ClientMessage::JoinVoice {
            channel: channel.to_string(),
            muted,
        })
    }

    async fn leave_voice(&self, channel: &str) -> Result<(), MeshError> {
        self.send(ClientMessage::LeaveVoice {
            channel: channel.to_string(),
        })
    }

    async fn relay_signal(
        &self,
        channel: &str,
        to: &ConnectionHandle,
        signal: Signal,
    ) -> Result<(), MeshError> {
        self.send(ClientMessage::RelaySignal {
            channel: channel.to_string(),
            to: to.clone(),
            signal,
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<(), MeshError> {
        self.send(ClientMessage::Subscribe {
            channel: channel.to_string(),
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), MeshError> {
        self.send(ClientMessage::Unsubscribe {
            channel: channel.to_string(),
        })
    }

    async fn publish(&self, channel: &str, event: ChatEvent) -> Result<(), MeshError> {
        self.send(ClientMessage::Publish {
            channel: channel.to_string(),
            event,
        })
    }

    async fn set_mute(&self, channel: &str, muted: bool) -> Result<(), MeshError> {
        self.send(ClientMessage::SetMute {
            channel: channel.to_string(),
            muted,
        })
    }
}
