//! Per-channel state slots.
//!
//! The outer map lock is held only long enough to find or create a slot.
//! All mutation and fanout for a channel happens under that channel's own
//! mutex, so unrelated channels never contend with each other.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// State kept per channel. Empty state is dropped from the map.
pub(crate) trait ChannelState: Default + Send + 'static {
    fn is_empty(&self) -> bool;
}

pub(crate) struct Slot<S> {
    retired: bool,
    state: S,
}

pub(crate) struct ChannelMap<S> {
    slots: RwLock<HashMap<String, Arc<Mutex<Slot<S>>>>>,
}

/// Exclusive access to one channel's state.
pub(crate) struct ChannelGuard<S> {
    channel: String,
    guard: OwnedMutexGuard<Slot<S>>,
}

impl<S: ChannelState> ChannelMap<S> {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Lock the live slot for `channel`, creating it if needed.
    pub(crate) async fn lock_or_create(&self, channel: &str) -> ChannelGuard<S> {
        loop {
            let existing = self.slots.read().await.get(channel).cloned();
            let slot = match existing {
                Some(slot) => slot,
                None => Arc::clone(
                    self.slots
                        .write()
                        .await
                        .entry(channel.to_string())
                        .or_insert_with(|| {
                            Arc::new(Mutex::new(Slot {
                                retired: false,
                                state: S::default(),
                            }))
                        }),
                ),
            };

            let guard = slot.lock_owned().await;
            // Lost a race with the slot being emptied and removed; resolve again.
            if !guard.retired {
                return ChannelGuard {
                    channel: channel.to_string(),
                    guard,
                };
            }
        }
    }

    /// Lock `channel` only if it currently has state. Unknown channels are
    /// treated as empty.
    pub(crate) async fn lock_existing(&self, channel: &str) -> Option<ChannelGuard<S>> {
        let slot = self.slots.read().await.get(channel).cloned()?;
        let guard = slot.lock_owned().await;
        if guard.retired {
            return None;
        }
        Some(ChannelGuard {
            channel: channel.to_string(),
            guard,
        })
    }

    /// Unlock a channel, removing it from the map if its state is empty.
    pub(crate) async fn release(&self, mut guard: ChannelGuard<S>) {
        if !guard.guard.state.is_empty() {
            return;
        }
        guard.guard.retired = true;
        let mut slots = self.slots.write().await;
        if let Some(current) = slots.get(&guard.channel) {
            if Arc::ptr_eq(current, OwnedMutexGuard::mutex(&guard.guard)) {
                slots.remove(&guard.channel);
            }
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}

impl<S> ChannelGuard<S> {
    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }
}

impl<S> Deref for ChannelGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard.state
    }
}

impl<S> DerefMut for ChannelGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter(Vec<u32>);

    impl ChannelState for Counter {
        fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    #[tokio::test]
    async fn unknown_channel_is_absent() {
        let map: ChannelMap<Counter> = ChannelMap::new();
        assert!(map.lock_existing("nope").await.is_none());
        assert_eq!(map.len().await, 0);
    }

    #[tokio::test]
    async fn empty_slot_is_removed_on_release() {
        let map: ChannelMap<Counter> = ChannelMap::new();
        let guard = map.lock_or_create("a").await;
        assert_eq!(map.len().await, 1);
        map.release(guard).await;
        assert_eq!(map.len().await, 0);
    }

    #[tokio::test]
    async fn populated_slot_survives_release() {
        let map: ChannelMap<Counter> = ChannelMap::new();
        let mut guard = map.lock_or_create("a").await;
        guard.0.push(1);
        map.release(guard).await;

        let guard = map.lock_existing("a").await.unwrap();
        assert_eq!(guard.0, vec![1]);
        assert_eq!(guard.channel(), "a");
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_channel_lose_nothing() {
        let map: Arc<ChannelMap<Counter>> = Arc::new(ChannelMap::new());
        let mut tasks = Vec::new();
        for i in 0..64u32 {
            let map = Arc::clone(&map);
            tasks.push(tokio::spawn(async move {
                let mut guard = map.lock_or_create("shared").await;
                guard.0.push(i);
                map.release(guard).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let guard = map.lock_existing("shared").await.unwrap();
        assert_eq!(guard.0.len(), 64);
    }

    #[tokio::test]
    async fn writer_racing_retirement_lands_in_fresh_slot() {
        let map: Arc<ChannelMap<Counter>> = Arc::new(ChannelMap::new());
        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let map = Arc::clone(&map);
            tasks.push(tokio::spawn(async move {
                // Alternate between emptying and filling the channel.
                let mut guard = map.lock_or_create("churn").await;
                if i % 2 == 0 {
                    guard.0.clear();
                } else {
                    guard.0.push(i);
                }
                map.release(guard).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        // Whatever survived must be reachable through the map.
        if let Some(guard) = map.lock_existing("churn").await {
            assert!(!guard.0.is_empty());
        }
        assert!(map.len().await <= 1);
    }
}
