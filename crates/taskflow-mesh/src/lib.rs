//! taskflow-mesh: the client side of the hub.
//!
//! - [`MeshOrchestrator`] keeps one direct peer connection per remote voice
//!   participant, driven by roster snapshots and relayed signals.
//! - [`ChannelTimeline`] folds chat events into a local channel view.
//! - [`HubClient`] speaks the hub's WebSocket protocol.
//!
//! The WebRTC engine and microphone sit behind the traits in [`peer`], and
//! the hub connection behind [`HubLink`], so the orchestrator runs against
//! fakes in tests.

pub mod chat;
pub mod client;
mod connection;
pub mod link;
pub mod orchestrator;
pub mod peer;

pub use chat::{ChannelTimeline, TimelineConfig};
pub use client::HubClient;
pub use link::HubLink;
pub use orchestrator::{LocalParticipant, MeshEvent, MeshOrchestrator, PeerState};
pub use peer::{
    IceCandidate, LocalAudio, MediaDevices, PeerConnection, PeerConnector, SdpKind,
    SessionDescription,
};
