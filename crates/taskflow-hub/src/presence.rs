//! Voice presence: which connections are in which voice channel.
//!
//! Each channel keeps an insertion-ordered roster, unique by connection
//! handle. Every change is followed by one full-roster broadcast to the
//! channel's members, sent while the channel is still locked so all
//! members observe rosters in mutation order.

use std::collections::{BTreeSet, HashMap};

use taskflow_common::{ConnectionHandle, Participant, ServerMessage};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channels::{ChannelGuard, ChannelMap, ChannelState};
use crate::registry::ConnectionRegistry;

#[derive(Default)]
struct Roster {
    participants: Vec<Participant>,
}

impl ChannelState for Roster {
    fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

impl Roster {
    fn position(&self, handle: &ConnectionHandle) -> Option<usize> {
        self.participants.iter().position(|p| &p.handle == handle)
    }
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The handle was already present; the roster is rebroadcast anyway.
    AlreadyPresent,
    /// The channel is at its participant cap. Nothing changed.
    ChannelFull,
    /// The handle is not (or no longer) registered. Nothing changed.
    NotRegistered,
}

/// Per-channel voice presence.
pub struct PresenceRegistry {
    channels: ChannelMap<Roster>,
    /// Channels each handle is present in, so a disconnect sweep does not
    /// have to scan every channel.
    memberships: Mutex<HashMap<ConnectionHandle, BTreeSet<String>>>,
    registry: ConnectionRegistry,
    max_participants: usize,
}

impl PresenceRegistry {
    /// `max_participants == 0` means unlimited.
    pub fn new(registry: ConnectionRegistry, max_participants: usize) -> Self {
        Self {
            channels: ChannelMap::new(),
            memberships: Mutex::new(HashMap::new()),
            registry,
            max_participants,
        }
    }

    /// Add `participant` to `channel` keyed by `participant.handle`.
    pub async fn join(&self, channel: &str, participant: Participant) -> JoinOutcome {
        let handle = participant.handle.clone();
        if !self.registry.is_live(&handle).await {
            debug!(handle = %handle, channel, "Ignoring join from unregistered handle");
            return JoinOutcome::NotRegistered;
        }

        let mut roster = self.channels.lock_or_create(channel).await;
        let outcome = if roster.position(&handle).is_some() {
            debug!(handle = %handle, channel, "Duplicate join");
            JoinOutcome::AlreadyPresent
        } else if self.max_participants > 0 && roster.participants.len() >= self.max_participants
        {
            info!(handle = %handle, channel, "Voice channel full");
            JoinOutcome::ChannelFull
        } else {
            // Liveness is rechecked under the membership lock so a
            // concurrent sweep either sees this entry or we see it closing.
            let mut memberships = self.memberships.lock().await;
            if self.registry.is_live(&handle).await {
                memberships
                    .entry(handle.clone())
                    .or_default()
                    .insert(channel.to_string());
                drop(memberships);
                info!(handle = %handle, user_id = %participant.user_id, channel, "Joined voice");
                roster.participants.push(participant);
                JoinOutcome::Joined
            } else {
                JoinOutcome::NotRegistered
            }
        };

        if matches!(outcome, JoinOutcome::Joined | JoinOutcome::AlreadyPresent) {
            self.broadcast(&roster).await;
        }
        self.channels.release(roster).await;
        outcome
    }

    /// Remove `handle` from `channel`. Returns false (and broadcasts
    /// nothing) if it was not there.
    pub async fn leave(&self, channel: &str, handle: &ConnectionHandle) -> bool {
        let Some(mut roster) = self.channels.lock_existing(channel).await else {
            return false;
        };
        let Some(idx) = roster.position(handle) else {
            self.channels.release(roster).await;
            return false;
        };

        roster.participants.remove(idx);
        {
            let mut memberships = self.memberships.lock().await;
            if let Some(set) = memberships.get_mut(handle) {
                set.remove(channel);
                if set.is_empty() {
                    memberships.remove(handle);
                }
            }
        }
        info!(handle = %handle, channel, "Left voice");

        self.broadcast(&roster).await;
        self.channels.release(roster).await;
        true
    }

    /// Remove `handle` from every channel it is in, broadcasting once per
    /// affected channel. Returns the channels it was removed from.
    pub async fn sweep(&self, handle: &ConnectionHandle) -> Vec<String> {
        let channels = self
            .memberships
            .lock()
            .await
            .remove(handle)
            .unwrap_or_default();

        let mut left = Vec::with_capacity(channels.len());
        for channel in channels {
            let Some(mut roster) = self.channels.lock_existing(&channel).await else {
                continue;
            };
            if let Some(idx) = roster.position(handle) {
                roster.participants.remove(idx);
                self.broadcast(&roster).await;
                left.push(channel);
            }
            self.channels.release(roster).await;
        }

        if !left.is_empty() {
            info!(handle = %handle, channels = ?left, "Swept from voice channels");
        }
        left
    }

    /// Current roster of `channel`, in join order.
    pub async fn roster(&self, channel: &str) -> Vec<Participant> {
        match self.channels.lock_existing(channel).await {
            Some(roster) => {
                let participants = roster.participants.clone();
                self.channels.release(roster).await;
                participants
            }
            None => Vec::new(),
        }
    }

    /// Record a participant's mute flag so later roster snapshots carry it.
    /// No roster broadcast is sent; the live change travels as a chat event.
    pub async fn set_muted(
        &self,
        channel: &str,
        handle: &ConnectionHandle,
        muted: bool,
    ) -> Option<Participant> {
        let mut roster = self.channels.lock_existing(channel).await?;
        let updated = roster.position(handle).map(|idx| {
            roster.participants[idx].muted = muted;
            roster.participants[idx].clone()
        });
        self.channels.release(roster).await;
        updated
    }

    /// Channels `handle` is currently present in.
    pub async fn channels_of(&self, handle: &ConnectionHandle) -> Vec<String> {
        self.memberships
            .lock()
            .await
            .get(handle)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of voice channels with at least one participant.
    pub async fn active_channels(&self) -> usize {
        self.channels.len().await
    }

    async fn broadcast(&self, roster: &ChannelGuard<Roster>) {
        let msg = ServerMessage::Roster {
            channel: roster.channel().to_string(),
            participants: roster.participants.clone(),
        };
        let delivered = self
            .registry
            .send_many(roster.participants.iter().map(|p| &p.handle), &msg)
            .await;
        debug!(
            channel = roster.channel(),
            size = roster.participants.len(),
            delivered,
            "Roster broadcast"
        );
    }
}
