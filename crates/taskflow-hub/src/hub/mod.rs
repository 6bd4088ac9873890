//! The hub: owns the shared registries and routes client frames to them.


use std::sync::Arc;

use taskflow_common::{
    ChatEvent, ClientMessage, ConnectionHandle, Participant, RelayError, ServerMessage, SignalingEnvelope,
};
use taskflow_config::HubConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::ChannelEventBus;
use crate::lifecycle::ConnectionLifecycleManager;
use crate::presence::{JoinOutcome, PresenceRegistry};
use crate::registry::{ConnectionRegistry, Identity};
use crate::signaling::SignalingRelay;

/// Cheaply cloneable handle to the hub's shared state.
#[derive(Clone)]
pub struct Hub {
    registry: ConnectionRegistry,
    presence: Arc<PresenceRegistry>,
    relay: SignalingRelay,
    bus: Arc<ChannelEventBus>,
    outbound_queue: usize,
}

impl Hub {
    /// Build the hub and spawn its lifecycle manager. Must be called from
    /// within a tokio runtime.
    pub fn start(config: &HubConfig) -> Self {
        let (registry, closed_rx) = ConnectionRegistry::new();
        let presence = Arc::new(PresenceRegistry::new(
            registry.clone(),
            config.presence.max_participants_per_channel,
        ));
        let bus = Arc::new(ChannelEventBus::new(registry.clone()));
        let relay = SignalingRelay::new(registry.clone());

        ConnectionLifecycleManager::new(registry.clone(), Arc::clone(&presence), Arc::clone(&bus))
            .spawn(closed_rx);

        Self {
            registry,
            presence,
            relay,
            bus,
            outbound_queue: config.server.outbound_queue.max(1),
        }
    }

    /// Register a new connection. The returned receiver is the connection's
    /// outbound queue and already holds the `welcome` frame.
    pub async fn connect(
        &self,
        identity: Identity,
    ) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let handle = ConnectionHandle::mint();
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let _ = tx.try_send(ServerMessage::Welcome {
            handle: handle.clone(),
        });
        info!(handle = %handle, user_id = %identity.user_id, "Client registered");
        self.registry.register(handle.clone(), tx, identity).await;
        (handle, rx)
    }

    /// Transport closed. Cleanup runs asynchronously in the lifecycle manager.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        if self.registry.unregister(handle).await {
            info!(handle = %handle, "Client disconnected");
        }
    }

    /// Apply one frame received from `handle`.
    pub async fn dispatch(&self, handle: &ConnectionHandle, msg: ClientMessage) {
        match msg {
            ClientMessage::Hello { .. } => {
                self.reply_error(handle, "hello already received").await;
            }
            ClientMessage::JoinVoice { channel, muted } => {
                let Some(identity) = self.registry.identity(handle).await else {
                    debug!(handle = %handle, channel = %channel, "Join after disconnect ignored");
                    return;
                };
                let participant = Participant {
                    handle: handle.clone(),
                    user_id: identity.user_id,
                    display_name: identity.display_name,
                    avatar: identity.avatar,
                    muted,
                };
                match self.presence.join(&channel, participant).await {
                    JoinOutcome::ChannelFull => {
                        self.reply_error(handle, &format!("voice channel {channel} is full"))
                            .await;
                    }
                    JoinOutcome::NotRegistered => {
                        debug!(handle = %handle, channel = %channel, "Join after disconnect ignored");
                    }
                    JoinOutcome::Joined | JoinOutcome::AlreadyPresent => {}
                }
            }
            ClientMessage::LeaveVoice { channel } => {
                self.presence.leave(&channel, handle).await;
            }
            ClientMessage::RelaySignal { channel, to, signal } => {
                let envelope = SignalingEnvelope {
                    channel,
                    from: handle.clone(),
                    to: to.clone(),
                    signal,
                };
                match self.relay.relay(handle, &to, envelope).await {
                    Ok(_) => {}
                    Err(e @ RelayError::SelfSignal(_)) => {
                        self.reply_error(handle, &e.to_string()).await;
                    }
                    Err(e) => debug!(handle = %handle, error = %e, "Relay refused"),
                }
            }
            ClientMessage::Subscribe { channel } => {
                self.bus.subscribe(&channel, handle).await;
            }
            ClientMessage::Unsubscribe { channel } => {
                self.bus.unsubscribe(&channel, handle).await;
            }
            ClientMessage::Publish { channel, event } => {
                if self.bus.publish_from(&channel, event, handle).await.is_none() {
                    self.reply_error(handle, &format!("not subscribed to {channel}"))
                        .await;
                }
            }
            ClientMessage::SetMute { channel, muted } => {
                self.set_mute(handle, &channel, muted).await;
            }
        }
    }

    async fn set_mute(&self, handle: &ConnectionHandle, channel: &str, muted: bool) {
        let Some(participant) = self.presence.set_muted(channel, handle, muted).await else {
            debug!(handle = %handle, channel, "Mute from non-participant ignored");
            return;
        };
        self.bus
            .publish(
                channel,
                ChatEvent::MuteChanged {
                    handle: handle.clone(),
                    user_id: participant.user_id,
                    muted,
                },
                Some(handle),
            )
            .await;
    }

    async fn reply_error(&self, handle: &ConnectionHandle, message: &str) {
        warn!(handle = %handle, message, "Protocol error");
        self.registry
            .send(
                handle,
                ServerMessage::Error {
                    message: message.to_string(),
                },
            )
            .await;
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn bus(&self) -> &ChannelEventBus {
        &self.bus
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }
}
