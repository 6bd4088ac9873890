//! Point-to-point forwarding of WebRTC signaling envelopes.
//!
//! Delivery is at-most-once. An envelope for a target that has already
//! gone is dropped; the sender's next roster update is what drives any
//! renegotiation, so nothing is buffered or retried here.

use taskflow_common::{ConnectionHandle, RelayError, ServerMessage, SignalingEnvelope};
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// What happened to a relayed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// Target is not registered (or its transport is closed).
    Dropped,
}

#[derive(Clone)]
pub struct SignalingRelay {
    registry: ConnectionRegistry,
}

impl SignalingRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Forward `envelope` from `from` to `to`, stamping both ends.
    pub async fn relay(
        &self,
        from: &ConnectionHandle,
        to: &ConnectionHandle,
        mut envelope: SignalingEnvelope,
    ) -> Result<RelayOutcome, RelayError> {
        if from == to {
            warn!(handle = %from, "Rejected self-addressed signal");
            return Err(RelayError::SelfSignal(from.to_string()));
        }
        if !self.registry.is_live(from).await {
            return Err(RelayError::NotRegistered(from.to_string()));
        }

        envelope.from = from.clone();
        envelope.to = to.clone();
        let kind = envelope.signal.kind();
        let channel = envelope.channel.clone();

        if self
            .registry
            .send(to, ServerMessage::Signal { envelope })
            .await
        {
            debug!(from = %from, to = %to, channel = %channel, ?kind, "Signal relayed");
            Ok(RelayOutcome::Delivered)
        } else {
            debug!(from = %from, to = %to, channel = %channel, ?kind, "Stale target, signal dropped");
            Ok(RelayOutcome::Dropped)
        }
    }
}
