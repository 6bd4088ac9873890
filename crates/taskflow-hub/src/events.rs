//! Channel event bus: fans chat lifecycle and ephemeral events out to every
//! connection subscribed to a channel.
//!
//! Subscriptions are independent of voice presence. The bus keeps no event
//! history; persistence belongs to whoever published the event.

use std::collections::{BTreeSet, HashMap};

use taskflow_common::{ChatEvent, ConnectionHandle, ServerMessage};
use tokio::sync::Mutex;
use tracing::debug;

use crate::channels::{ChannelGuard, ChannelMap, ChannelState};
use crate::registry::ConnectionRegistry;

#[derive(Default)]
struct Subscribers {
    handles: Vec<ConnectionHandle>,
}

impl ChannelState for Subscribers {
    fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

pub struct ChannelEventBus {
    channels: ChannelMap<Subscribers>,
    subscriptions: Mutex<HashMap<ConnectionHandle, BTreeSet<String>>>,
    registry: ConnectionRegistry,
}

impl ChannelEventBus {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            channels: ChannelMap::new(),
            subscriptions: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Subscribe `handle` to `channel`. Returns true if newly subscribed.
    pub async fn subscribe(&self, channel: &str, handle: &ConnectionHandle) -> bool {
        if !self.registry.is_live(handle).await {
            return false;
        }
        let mut subs = self.channels.lock_or_create(channel).await;
        let mut added = false;
        if !subs.handles.contains(handle) {
            let mut subscriptions = self.subscriptions.lock().await;
            if self.registry.is_live(handle).await {
                subscriptions
                    .entry(handle.clone())
                    .or_default()
                    .insert(channel.to_string());
                drop(subscriptions);
                subs.handles.push(handle.clone());
                debug!(handle = %handle, channel, "Subscribed");
                added = true;
            }
        }
        self.channels.release(subs).await;
        added
    }

    /// Unsubscribe `handle` from `channel`. Returns true if it was subscribed.
    pub async fn unsubscribe(&self, channel: &str, handle: &ConnectionHandle) -> bool {
        let Some(mut subs) = self.channels.lock_existing(channel).await else {
            return false;
        };
        let removed = Self::remove_handle(&mut subs.handles, handle);
        if removed {
            let mut subscriptions = self.subscriptions.lock().await;
            if let Some(set) = subscriptions.get_mut(handle) {
                set.remove(channel);
                if set.is_empty() {
                    subscriptions.remove(handle);
                }
            }
            debug!(handle = %handle, channel, "Unsubscribed");
        }
        self.channels.release(subs).await;
        removed
    }

    /// Drop every subscription `handle` holds. Returns how many there were.
    pub async fn unsubscribe_all(&self, handle: &ConnectionHandle) -> usize {
        let channels = self
            .subscriptions
            .lock()
            .await
            .remove(handle)
            .unwrap_or_default();

        let mut dropped = 0;
        for channel in channels {
            if let Some(mut subs) = self.channels.lock_existing(&channel).await {
                if Self::remove_handle(&mut subs.handles, handle) {
                    dropped += 1;
                }
                self.channels.release(subs).await;
            }
        }
        dropped
    }

    /// Fan `event` out to the subscribers of `channel`.
    ///
    /// `origin` is the publishing connection, if any; whether it receives
    /// its own event is decided by [`ChatEvent::echoes_to_origin`].
    /// Returns the number of subscribers the event was queued for.
    pub async fn publish(
        &self,
        channel: &str,
        event: ChatEvent,
        origin: Option<&ConnectionHandle>,
    ) -> usize {
        let Some(subs) = self.channels.lock_existing(channel).await else {
            debug!(channel, event = event.name(), "Publish to channel with no subscribers");
            return 0;
        };
        self.fan_out(subs, channel, event, origin).await
    }

    async fn fan_out(
        &self,
        subs: ChannelGuard<Subscribers>,
        channel: &str,
        event: ChatEvent,
        origin: Option<&ConnectionHandle>,
    ) -> usize {
        let skip = if event.echoes_to_origin() { None } else { origin };
        let name = event.name();
        let msg = ServerMessage::ChatEvent {
            channel: channel.to_string(),
            event,
        };
        let targets = subs.handles.iter().filter(|h| Some(*h) != skip);
        let delivered = self.registry.send_many(targets, &msg).await;
        self.channels.release(subs).await;

        debug!(channel, event = name, delivered, "Event published");
        delivered
    }

    /// Fan out an event a client published. Only subscribers of `channel`
    /// may publish to it; returns `None` and delivers nothing otherwise.
    pub async fn publish_from(
        &self,
        channel: &str,
        event: ChatEvent,
        origin: &ConnectionHandle,
    ) -> Option<usize> {
        let Some(subs) = self.channels.lock_existing(channel).await else {
            debug!(channel, handle = %origin, "Publish from non-subscriber refused");
            return None;
        };
        if !subs.handles.contains(origin) {
            self.channels.release(subs).await;
            debug!(channel, handle = %origin, "Publish from non-subscriber refused");
            return None;
        }
        Some(self.fan_out(subs, channel, event, Some(origin)).await)
    }

    /// Current subscribers of `channel`, in subscription order.
    pub async fn subscribers(&self, channel: &str) -> Vec<ConnectionHandle> {
        match self.channels.lock_existing(channel).await {
            Some(subs) => {
                let handles = subs.handles.clone();
                self.channels.release(subs).await;
                handles
            }
            None => Vec::new(),
        }
    }

    fn remove_handle(handles: &mut Vec<ConnectionHandle>, handle: &ConnectionHandle) -> bool {
        match handles.iter().position(|h| h == handle) {
            Some(idx) => {
                handles.remove(idx);
                true
            }
            None => false,
        }
    }
}
