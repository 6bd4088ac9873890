//! taskflow-hub: real-time presence, signaling, and chat event hub.
//!
//! Tracks which connections are present in which voice channels, relays
//! WebRTC offer/answer/ICE envelopes between peers, and fans chat events
//! out to channel subscribers. Media never flows through the hub.

mod channels;

pub mod connection;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod server;
pub mod signaling;

pub use events::ChannelEventBus;
pub use hub::Hub;
pub use lifecycle::{ConnectionLifecycleManager, SweepReport};
pub use presence::{JoinOutcome, PresenceRegistry};
pub use registry::{ConnectionRegistry, Identity, Outbound};
pub use signaling::{RelayOutcome, SignalingRelay};
