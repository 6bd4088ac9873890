//! Seams to the WebRTC engine and the local microphone.
//!
//! SDP and candidate strings are opaque here; the engine produces them and
//! the orchestrator only moves them between the engine and the hub.

use std::sync::Arc;

use async_trait::async_trait;
use taskflow_common::{ConnectionHandle, MeshError, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn into_signal(self) -> Signal {
        match self.kind {
            SdpKind::Offer => Signal::Offer { sdp: self.sdp },
            SdpKind::Answer => Signal::Answer { sdp: self.sdp },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
}

impl IceCandidate {
    pub fn into_signal(self) -> Signal {
        Signal::IceCandidate {
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_m_line_index: self.sdp_m_line_index,
        }
    }
}

/// One direct connection to a remote participant.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&mut self) -> Result<SessionDescription, MeshError>;
    async fn create_answer(&mut self) -> Result<SessionDescription, MeshError>;
    async fn set_local_description(&mut self, desc: SessionDescription)
        -> Result<(), MeshError>;
    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), MeshError>;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MeshError>;
    /// Attach the outgoing microphone track.
    async fn add_local_audio(&mut self, audio: Arc<dyn LocalAudio>) -> Result<(), MeshError>;
    /// Stop remote media and release the connection. Safe to call twice.
    async fn close(&mut self);
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        peer: &ConnectionHandle,
        ice_servers: &[String],
    ) -> Result<Box<dyn PeerConnection>, MeshError>;
}

/// The local outgoing audio track.
pub trait LocalAudio: Send + Sync {
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
}

/// Microphone access. Acquisition may suspend while the user decides.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire_microphone(&self) -> Result<Arc<dyn LocalAudio>, MeshError>;
}
