//! Disconnect-driven cleanup.
//!
//! Every handle the registry unregisters arrives here exactly once. The
//! manager removes it from voice presence and from every event bus
//! subscription, and only then releases it from the registry. Explicit
//! leave/unsubscribe requests are a fast path; this is the guarantee.

use std::sync::Arc;

use chrono::Utc;
use taskflow_common::ConnectionHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::ChannelEventBus;
use crate::presence::PresenceRegistry;
use crate::registry::ConnectionRegistry;

/// What a disconnect sweep cleaned up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub handle: ConnectionHandle,
    pub channels_left: Vec<String>,
    pub subscriptions_dropped: usize,
}

#[derive(Clone)]
pub struct ConnectionLifecycleManager {
    registry: ConnectionRegistry,
    presence: Arc<PresenceRegistry>,
    bus: Arc<ChannelEventBus>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        registry: ConnectionRegistry,
        presence: Arc<PresenceRegistry>,
        bus: Arc<ChannelEventBus>,
    ) -> Self {
        Self {
            registry,
            presence,
            bus,
        }
    }

    /// Consume closed handles until the registry is dropped.
    pub fn spawn(self, mut closed_rx: mpsc::UnboundedReceiver<ConnectionHandle>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(handle) = closed_rx.recv().await {
                self.handle_close(&handle).await;
            }
            debug!("Lifecycle manager stopped");
        })
    }

    /// Sweep one closed handle out of all shared state.
    pub async fn handle_close(&self, handle: &ConnectionHandle) -> SweepReport {
        let channels_left = self.presence.sweep(handle).await;
        let subscriptions_dropped = self.bus.unsubscribe_all(handle).await;
        let connected_for = self
            .registry
            .connected_at(handle)
            .await
            .map(|at| (Utc::now() - at).num_seconds());
        self.registry.release(handle).await;

        info!(
            handle = %handle,
            voice_channels = channels_left.len(),
            subscriptions = subscriptions_dropped,
            connected_secs = ?connected_for,
            "Connection swept"
        );

        SweepReport {
            handle: handle.clone(),
            channels_left,
            subscriptions_dropped,
        }
    }
}
