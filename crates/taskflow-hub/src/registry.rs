//! Connection registry: maps live connection handles to their outbound
//! queue and the identity they announced in `hello`.
//!
//! The registry knows nothing about channels. Unregistering a handle marks
//! it closing (so it stops receiving traffic immediately) and hands it to
//! the lifecycle manager, which sweeps channel state and then releases it.
//!
//! Outbound queues are bounded. A connection whose queue is full when a
//! frame is routed to it is unregistered on the spot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskflow_common::{ConnectionHandle, ServerMessage};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Outbound half of a connection's transport.
pub type Outbound = mpsc::Sender<ServerMessage>;

/// Who a connection claims to be. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

struct Entry {
    outbound: Outbound,
    identity: Identity,
    connected_at: DateTime<Utc>,
    closing: bool,
}

/// Thread-safe connection registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<ConnectionHandle, Entry>>>,
    closed_tx: mpsc::UnboundedSender<ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create a registry. The receiver yields each unregistered handle
    /// exactly once and belongs to the lifecycle manager.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionHandle>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let registry = Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            closed_tx,
        };
        (registry, closed_rx)
    }

    /// Register a live transport. Registering the same handle again
    /// replaces its transport; a handle that is already closing is refused.
    pub async fn register(
        &self,
        handle: ConnectionHandle,
        outbound: Outbound,
        identity: Identity,
    ) -> bool {
        let mut map = self.entries.write().await;
        match map.get_mut(&handle) {
            Some(entry) if entry.closing => {
                warn!(handle = %handle, "Refusing to re-register a closing handle");
                false
            }
            Some(entry) => {
                entry.outbound = outbound;
                entry.identity = identity;
                true
            }
            None => {
                map.insert(
                    handle,
                    Entry {
                        outbound,
                        identity,
                        connected_at: Utc::now(),
                        closing: false,
                    },
                );
                true
            }
        }
    }

    /// Outbound queue for a live handle.
    pub async fn lookup(&self, handle: &ConnectionHandle) -> Option<Outbound> {
        let map = self.entries.read().await;
        map.get(handle)
            .filter(|e| !e.closing)
            .map(|e| e.outbound.clone())
    }

    pub async fn identity(&self, handle: &ConnectionHandle) -> Option<Identity> {
        let map = self.entries.read().await;
        map.get(handle)
            .filter(|e| !e.closing)
            .map(|e| e.identity.clone())
    }

    pub async fn is_live(&self, handle: &ConnectionHandle) -> bool {
        self.entries
            .read()
            .await
            .get(handle)
            .is_some_and(|e| !e.closing)
    }

    /// When the handle connected. Still answers while the handle is closing.
    pub async fn connected_at(&self, handle: &ConnectionHandle) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(handle).map(|e| e.connected_at)
    }

    /// Queue `msg` for one handle. Returns false if the handle is gone, its
    /// transport has shut down, or its queue overflowed.
    pub async fn send(&self, handle: &ConnectionHandle, msg: ServerMessage) -> bool {
        let Some(tx) = self.lookup(handle).await else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                if matches!(e, TrySendError::Full(_)) {
                    self.evict_slow(handle).await;
                } else {
                    debug!(handle = %handle, "Outbound queue closed");
                }
                false
            }
        }
    }

    /// Queue a copy of `msg` for every live handle in `handles`, in order.
    /// Returns how many transports accepted it.
    pub async fn send_many<'a, I>(&self, handles: I, msg: &ServerMessage) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionHandle>,
    {
        let map = self.entries.read().await;
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        for handle in handles {
            let Some(entry) = map.get(handle).filter(|e| !e.closing) else {
                continue;
            };
            match entry.outbound.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => overflowed.push(handle.clone()),
                Err(TrySendError::Closed(_)) => {
                    debug!(handle = %handle, "Outbound queue closed");
                }
            }
        }
        drop(map);

        for handle in &overflowed {
            self.evict_slow(handle).await;
        }
        delivered
    }

    async fn evict_slow(&self, handle: &ConnectionHandle) {
        if self.unregister(handle).await {
            warn!(handle = %handle, "Outbound queue full; disconnecting slow client");
        }
    }

    /// Begin teardown of a handle. Returns true the first time only; the
    /// handle is handed to the lifecycle manager for sweeping.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut map = self.entries.write().await;
        let Some(entry) = map.get_mut(handle) else {
            return false;
        };
        if entry.closing {
            return false;
        }
        entry.closing = true;
        drop(map);

        if self.closed_tx.send(handle.clone()).is_err() {
            warn!(handle = %handle, "Lifecycle manager is not running; handle will not be swept");
        }
        true
    }

    /// Forget a handle entirely. Called by the lifecycle manager once the
    /// handle has been swept from all channel state.
    pub async fn release(&self, handle: &ConnectionHandle) {
        self.entries.write().await.remove(handle);
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.closing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: user.into(),
            display_name: user.to_uppercase(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let (registry, _closed) = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        assert!(registry.register("s1".into(), tx, identity("u1")).await);

        assert!(registry.lookup(&"s1".into()).await.is_some());
        assert!(registry.lookup(&"s2".into()).await.is_none());
        assert_eq!(registry.identity(&"s1".into()).await.unwrap().user_id, "u1");
        assert!(registry.connected_at(&"s1".into()).await.is_some());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (registry, _closed) = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        assert!(registry.register("s1".into(), tx.clone(), identity("u1")).await);
        assert!(registry.register("s1".into(), tx, identity("u1")).await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn unregister_hides_handle_and_notifies_once() {
        let (registry, mut closed) = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register("s1".into(), tx, identity("u1")).await;

        assert!(registry.unregister(&"s1".into()).await);
        assert!(!registry.unregister(&"s1".into()).await);
        assert!(registry.lookup(&"s1".into()).await.is_none());
        assert!(!registry.is_live(&"s1".into()).await);

        assert_eq!(closed.recv().await.unwrap(), ConnectionHandle::from("s1"));
        assert!(closed.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_handle_cannot_be_reregistered() {
        let (registry, _closed) = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register("s1".into(), tx.clone(), identity("u1")).await;
        registry.unregister(&"s1".into()).await;
        assert!(!registry.register("s1".into(), tx, identity("u1")).await);

        registry.release(&"s1".into()).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn send_many_skips_missing_and_closed() {
        let (registry, _closed) = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, rx2) = mpsc::channel(8);
        registry.register("s1".into(), tx1, identity("u1")).await;
        registry.register("s2".into(), tx2, identity("u2")).await;
        drop(rx2);

        let msg = ServerMessage::Error {
            message: "hi".into(),
        };
        let targets: Vec<ConnectionHandle> = vec!["s1".into(), "s2".into(), "s3".into()];
        assert_eq!(registry.send_many(&targets, &msg).await, 1);
        assert_eq!(rx1.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn full_queue_disconnects_the_slow_client() {
        let (registry, mut closed) = ConnectionRegistry::new();
        let (slow_tx, _slow_rx) = mpsc::channel(2);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.register("slow".into(), slow_tx, identity("u1")).await;
        registry.register("fast".into(), fast_tx, identity("u2")).await;

        let msg = ServerMessage::Error {
            message: "tick".into(),
        };
        let targets: Vec<ConnectionHandle> = vec!["slow".into(), "fast".into()];
        assert_eq!(registry.send_many(&targets, &msg).await, 2);
        assert_eq!(registry.send_many(&targets, &msg).await, 2);
        assert_eq!(registry.send_many(&targets, &msg).await, 1);

        assert!(!registry.is_live(&"slow".into()).await);
        assert_eq!(closed.recv().await.unwrap(), ConnectionHandle::from("slow"));
        assert!(registry.is_live(&"fast".into()).await);
        for _ in 0..3 {
            assert_eq!(fast_rx.recv().await.unwrap(), msg);
        }
    }

    #[tokio::test]
    async fn direct_send_to_full_queue_disconnects() {
        let (registry, mut closed) = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.register("s1".into(), tx, identity("u1")).await;

        let msg = ServerMessage::Error {
            message: "tick".into(),
        };
        assert!(registry.send(&"s1".into(), msg.clone()).await);
        assert!(!registry.send(&"s1".into(), msg).await);
        assert_eq!(closed.recv().await.unwrap(), ConnectionHandle::from("s1"));
        assert_eq!(registry.count().await, 0);
    }
}
