//! Client-side mesh: one direct peer connection per remote participant.
//!
//! The orchestrator is owned by a single task and fed with the hub's
//! roster snapshots and relayed signals. Each roster is diffed against the
//! known peer set; new peers are negotiated with, departed peers are torn
//! down and tombstoned so late signals cannot bring them back.
//!
//! Per remote peer: `none → connecting → connected → closed`, with a side
//! state `failed` that the initiating side retries on the next roster.


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use taskflow_common::{
    ChatEvent, ConnectionHandle, MeshError, Participant, ServerMessage, Signal, SignalingEnvelope,
};
use taskflow_config::MeshConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::link::HubLink;
use crate::peer::{
    IceCandidate, LocalAudio, MediaDevices, PeerConnection, PeerConnector, SessionDescription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PeerStateChanged {
        peer: ConnectionHandle,
        user_id: String,
        state: PeerState,
    },
    RemoteMute {
        peer: ConnectionHandle,
        user_id: String,
        muted: bool,
    },
    Error {
        peer: Option<ConnectionHandle>,
        error: MeshError,
    },
}

/// Who we are on the hub. `handle` comes from the `welcome` frame.
#[derive(Debug, Clone)]
pub struct LocalParticipant {
    pub handle: ConnectionHandle,
    pub user_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

struct PeerSlot {
    user_id: String,
    muted: bool,
    initiator: bool,
    state: PeerState,
    /// A roster has named this peer. State events wait for it so they
    /// always carry a user id.
    announced: bool,
    reported: Option<PeerState>,
    conn: Option<Box<dyn PeerConnection>>,
    remote_set: bool,
    /// Remote candidates that arrived before the remote description.
    pending_ice: Vec<IceCandidate>,
}

impl PeerSlot {
    fn new(user_id: String, muted: bool, initiator: bool) -> Self {
        Self {
            user_id,
            muted,
            initiator,
            state: PeerState::Connecting,
            announced: true,
            reported: None,
            conn: None,
            remote_set: false,
            pending_ice: Vec::new(),
        }
    }

    async fn reset(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.remote_set = false;
    }

    /// A peer that signalled before any roster listed it.
    fn unannounced() -> Self {
        Self {
            announced: false,
            ..Self::new(String::new(), false, false)
        }
    }

    async fn fail(&mut self) {
        self.reset().await;
        self.pending_ice.clear();
        self.state = PeerState::Failed;
    }

    /// Apply buffered candidates once the remote description is in place.
    async fn flush_pending(&mut self, peer: &ConnectionHandle) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        for candidate in self.pending_ice.drain(..) {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                debug!(peer = %peer, error = %e, "Buffered ICE candidate rejected");
            }
        }
    }

    fn take_transition(&mut self) -> Option<PeerState> {
        if !self.announced || self.reported == Some(self.state) {
            return None;
        }
        self.reported = Some(self.state);
        Some(self.state)
    }
}

pub struct MeshOrchestrator {
    local: LocalParticipant,
    link: Arc<dyn HubLink>,
    connector: Arc<dyn PeerConnector>,
    media: Arc<dyn MediaDevices>,
    ice_servers: Vec<String>,
    channel: Option<String>,
    audio: Option<Arc<dyn LocalAudio>>,
    muted: bool,
    peers: HashMap<ConnectionHandle, PeerSlot>,
    departed: HashSet<ConnectionHandle>,
    event_tx: mpsc::UnboundedSender<MeshEvent>,
}

impl MeshOrchestrator {
    pub fn new(
        local: LocalParticipant,
        link: Arc<dyn HubLink>,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaDevices>,
        config: &MeshConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            local,
            link,
            connector,
            media,
            ice_servers: config.ice_servers.clone(),
            channel: None,
            audio: None,
            muted: false,
            peers: HashMap::new(),
            departed: HashSet::new(),
            event_tx,
        };
        (orchestrator, event_rx)
    }

    /// Acquire the microphone, subscribe to `channel`'s events, then
    /// announce ourselves in it.
    ///
    /// If the microphone is refused nothing is sent, so we never appear in
    /// the channel's roster. Joining a different channel leaves the
    /// current one first.
    pub async fn join(&mut self, channel: &str) -> Result<(), MeshError> {
        if self.channel.as_deref() == Some(channel) {
            return Ok(());
        }
        if self.channel.is_some() {
            self.leave().await;
        }

        let audio = match self.media.acquire_microphone().await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(channel, error = %e, "Microphone unavailable, not joining");
                return Err(e);
            }
        };
        audio.set_enabled(!self.muted);

        // Mute changes travel as channel events.
        if let Err(e) = self.link.subscribe(channel).await {
            audio.stop();
            return Err(e);
        }
        if let Err(e) = self.link.join_voice(channel, self.muted).await {
            let _ = self.link.unsubscribe(channel).await;
            audio.stop();
            return Err(e);
        }

        self.audio = Some(audio);
        self.channel = Some(channel.to_string());
        info!(channel, "Joined voice channel");
        Ok(())
    }

    /// Tear down every peer and leave the channel. Safe to call repeatedly.
    pub async fn leave(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        let handles: Vec<ConnectionHandle> = self.peers.keys().cloned().collect();
        for handle in handles {
            self.close_peer(&handle).await;
        }
        self.channel = None;
        self.departed.clear();
        if let Some(audio) = self.audio.take() {
            audio.stop();
        }
        if let Err(e) = self.link.leave_voice(&channel).await {
            debug!(channel = %channel, error = %e, "Leave not delivered");
        }
        if let Err(e) = self.link.unsubscribe(&channel).await {
            debug!(channel = %channel, error = %e, "Unsubscribe not delivered");
        }
        info!(channel = %channel, "Left voice channel");
    }

    /// Toggle the outgoing track and tell the channel. Connections are left
    /// as they are.
    pub async fn set_muted(&mut self, muted: bool) -> Result<(), MeshError> {
        self.muted = muted;
        if let Some(audio) = &self.audio {
            audio.set_enabled(!muted);
        }
        match &self.channel {
            Some(channel) => self.link.set_mute(channel, muted).await,
            None => Ok(()),
        }
    }

    /// Route one frame from the hub.
    pub async fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Roster {
                channel,
                participants,
            } => self.on_roster(&channel, participants).await,
            ServerMessage::Signal { envelope } => self.on_signal(envelope).await,
            ServerMessage::ChatEvent {
                channel,
                event:
                    ChatEvent::MuteChanged {
                        handle,
                        user_id,
                        muted,
                    },
            } => self.on_remote_mute(&channel, &handle, user_id, muted),
            _ => {}
        }
    }

    /// Reconcile the peer set against a roster snapshot.
    pub async fn on_roster(&mut self, channel: &str, participants: Vec<Participant>) {
        if self.channel.as_deref() != Some(channel) {
            return;
        }

        let present: HashSet<&ConnectionHandle> = participants
            .iter()
            .filter(|p| p.handle != self.local.handle)
            .map(|p| &p.handle)
            .collect();
        let gone: Vec<ConnectionHandle> = self
            .peers
            .keys()
            .filter(|h| !present.contains(h))
            .cloned()
            .collect();
        for handle in gone {
            self.close_peer(&handle).await;
        }

        for p in participants {
            if p.handle == self.local.handle {
                continue;
            }
            self.departed.remove(&p.handle);
            let initiator = self.initiates_with(&p.user_id, &p.handle);

            let mut slot = match self.peers.remove(&p.handle) {
                Some(mut slot) => {
                    slot.user_id = p.user_id.clone();
                    slot.initiator = initiator;
                    slot.announced = true;
                    if slot.muted != p.muted {
                        slot.muted = p.muted;
                        self.emit(MeshEvent::RemoteMute {
                            peer: p.handle.clone(),
                            user_id: p.user_id.clone(),
                            muted: p.muted,
                        });
                    }
                    let retry = slot.initiator && slot.state == PeerState::Failed;
                    let waiting = slot.initiator
                        && slot.state == PeerState::Connecting
                        && slot.conn.is_none();
                    if !(retry || waiting) {
                        self.settle(&p.handle, slot, Ok(())).await;
                        continue;
                    }
                    slot
                }
                None => PeerSlot::new(p.user_id.clone(), p.muted, initiator),
            };

            let result = if slot.initiator {
                self.offer(&p.handle, &mut slot).await
            } else {
                debug!(peer = %p.handle, "Waiting for remote offer");
                Ok(())
            };
            self.settle(&p.handle, slot, result).await;
        }
    }

    /// Apply a signal relayed from a remote peer.
    pub async fn on_signal(&mut self, envelope: SignalingEnvelope) {
        let SignalingEnvelope {
            channel,
            from,
            signal,
            ..
        } = envelope;
        if self.channel.as_deref() != Some(channel.as_str()) {
            debug!(peer = %from, channel = %channel, "Signal for another channel dropped");
            return;
        }
        if self.departed.contains(&from) {
            debug!(peer = %from, "Signal from departed peer dropped");
            return;
        }

        let existing = self.peers.remove(&from);
        let (slot, result) = match (signal, existing) {
            (Signal::Answer { .. }, None) => {
                debug!(peer = %from, "Answer for unknown peer dropped");
                return;
            }
            (Signal::Answer { sdp }, Some(mut slot)) => {
                let result = self.accept_answer(&from, &mut slot, sdp).await;
                (slot, result)
            }
            (Signal::Offer { sdp }, existing) => {
                let mut slot =
                    existing.unwrap_or_else(PeerSlot::unannounced);
                let result = self.answer(&from, &mut slot, sdp).await;
                (slot, result)
            }
            (
                Signal::IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                },
                existing,
            ) => {
                let mut slot =
                    existing.unwrap_or_else(PeerSlot::unannounced);
                let candidate = IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                };
                Self::add_remote_candidate(&from, &mut slot, candidate).await;
                (slot, Ok(()))
            }
        };
        self.settle(&from, slot, result).await;
    }

    /// Forward a candidate gathered by the local engine for `peer`.
    pub async fn on_local_candidate(&mut self, peer: &ConnectionHandle, candidate: IceCandidate) {
        if !self.peers.contains_key(peer) {
            return;
        }
        if let Err(e) = self.relay(peer, candidate.into_signal()).await {
            debug!(peer = %peer, error = %e, "Local candidate not relayed");
        }
    }

    /// The engine lost the connection to `peer`.
    pub async fn on_peer_failed(&mut self, peer: &ConnectionHandle) {
        let Some(slot) = self.peers.remove(peer) else {
            return;
        };
        let error = MeshError::Negotiation {
            peer: peer.to_string(),
            reason: "connection failed".into(),
        };
        self.settle(peer, slot, Err(error)).await;
    }

    fn on_remote_mute(
        &mut self,
        channel: &str,
        handle: &ConnectionHandle,
        user_id: String,
        muted: bool,
    ) {
        if self.channel.as_deref() != Some(channel) || handle == &self.local.handle {
            return;
        }
        match self.peers.get_mut(handle) {
            Some(slot) if slot.muted != muted => slot.muted = muted,
            _ => return,
        }
        self.emit(MeshEvent::RemoteMute {
            peer: handle.clone(),
            user_id,
            muted,
        });
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn peer_state(&self, peer: &ConnectionHandle) -> Option<PeerState> {
        self.peers.get(peer).map(|slot| slot.state)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // -- negotiation -------------------------------------------------------

    /// The smaller `(user_id, handle)` makes the offer.
    fn initiates_with(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        (self.local.user_id.as_str(), &self.local.handle) < (user_id, handle)
    }

    async fn offer(&self, peer: &ConnectionHandle, slot: &mut PeerSlot) -> Result<(), MeshError> {
        slot.reset().await;
        slot.state = PeerState::Connecting;
        let conn = slot.conn.insert(self.open(peer).await?);
        let offer = conn.create_offer().await?;
        conn.set_local_description(offer.clone()).await?;
        debug!(peer = %peer, "Sending offer");
        self.relay(peer, offer.into_signal()).await
    }

    async fn answer(
        &self,
        peer: &ConnectionHandle,
        slot: &mut PeerSlot,
        sdp: String,
    ) -> Result<(), MeshError> {
        if slot.initiator
            && slot.state == PeerState::Connecting
            && slot.conn.is_some()
            && !slot.remote_set
        {
            debug!(peer = %peer, "Competing offer ignored, ours stands");
            return Ok(());
        }

        slot.reset().await;
        slot.state = PeerState::Connecting;
        let conn = slot.conn.insert(self.open(peer).await?);
        conn.set_remote_description(SessionDescription::offer(sdp))
            .await?;
        slot.remote_set = true;
        slot.flush_pending(peer).await;

        let Some(conn) = slot.conn.as_mut() else {
            return Ok(());
        };
        let answer = conn.create_answer().await?;
        conn.set_local_description(answer.clone()).await?;
        debug!(peer = %peer, "Sending answer");
        self.relay(peer, answer.into_signal()).await?;
        slot.state = PeerState::Connected;
        Ok(())
    }

    async fn accept_answer(
        &self,
        peer: &ConnectionHandle,
        slot: &mut PeerSlot,
        sdp: String,
    ) -> Result<(), MeshError> {
        if slot.remote_set || slot.state != PeerState::Connecting {
            debug!(peer = %peer, "Unexpected answer dropped");
            return Ok(());
        }
        let Some(conn) = slot.conn.as_mut() else {
            debug!(peer = %peer, "Answer without an offer dropped");
            return Ok(());
        };
        conn.set_remote_description(SessionDescription::answer(sdp))
            .await?;
        slot.remote_set = true;
        slot.flush_pending(peer).await;
        slot.state = PeerState::Connected;
        Ok(())
    }

    async fn add_remote_candidate(
        peer: &ConnectionHandle,
        slot: &mut PeerSlot,
        candidate: IceCandidate,
    ) {
        if slot.remote_set {
            if let Some(conn) = slot.conn.as_mut() {
                if let Err(e) = conn.add_ice_candidate(candidate).await {
                    debug!(peer = %peer, error = %e, "ICE candidate rejected");
                }
                return;
            }
        }
        slot.pending_ice.push(candidate);
    }

    async fn open(&self, peer: &ConnectionHandle) -> Result<Box<dyn PeerConnection>, MeshError> {
        let mut conn = self.connector.create(peer, &self.ice_servers).await?;
        if let Some(audio) = &self.audio {
            if let Err(e) = conn.add_local_audio(Arc::clone(audio)).await {
                conn.close().await;
                return Err(e);
            }
        }
        Ok(conn)
    }

    async fn relay(&self, peer: &ConnectionHandle, signal: Signal) -> Result<(), MeshError> {
        let channel = self
            .channel
            .as_deref()
            .ok_or_else(|| MeshError::HubUnavailable("not in a voice channel".into()))?;
        self.link.relay_signal(channel, peer, signal).await
    }

    // -- bookkeeping -------------------------------------------------------

    async fn settle(
        &mut self,
        peer: &ConnectionHandle,
        mut slot: PeerSlot,
        result: Result<(), MeshError>,
    ) {
        if let Err(error) = result {
            warn!(peer = %peer, error = %error, "Peer negotiation failed");
            slot.fail().await;
            self.emit(MeshEvent::Error {
                peer: Some(peer.clone()),
                error,
            });
        }
        if let Some(state) = slot.take_transition() {
            debug!(peer = %peer, state = ?state, "Peer state changed");
            self.emit(MeshEvent::PeerStateChanged {
                peer: peer.clone(),
                user_id: slot.user_id.clone(),
                state,
            });
        }
        self.peers.insert(peer.clone(), slot);
    }

    async fn close_peer(&mut self, peer: &ConnectionHandle) {
        let Some(mut slot) = self.peers.remove(peer) else {
            return;
        };
        slot.reset().await;
        slot.pending_ice.clear();
        self.departed.insert(peer.clone());
        info!(peer = %peer, user_id = %slot.user_id, "Peer closed");
        if slot.reported.is_none() {
            return;
        }
        self.emit(MeshEvent::PeerStateChanged {
            peer: peer.clone(),
            user_id: slot.user_id,
            state: PeerState::Closed,
        });
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.event_tx.send(event);
    }
}
