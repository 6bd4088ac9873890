//! Wire protocol between clients and the hub.
//!
//! Every frame is a JSON text message tagged by `"type"`. Signaling
//! payloads and chat events are nested objects tagged by `"kind"`. The hub
//! only routes them; SDP and candidate strings are opaque.

use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ReactionBucket, ReadReceipt};
use crate::id::ConnectionHandle;

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// One connection's membership in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub handle: ConnectionHandle,
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub muted: bool,
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// WebRTC negotiation payload exchanged between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// SDP offer to establish a peer connection.
    Offer { sdp: String },
    /// SDP answer in response to an offer.
    Answer { sdp: String },
    /// ICE candidate for NAT traversal.
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer { .. } => SignalKind::Offer,
            Signal::Answer { .. } => SignalKind::Answer,
            Signal::IceCandidate { .. } => SignalKind::IceCandidate,
        }
    }
}

/// A signal in flight from one connection to another.
///
/// `from` is always stamped by the hub; whatever the sender put there is
/// overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub channel: String,
    pub from: ConnectionHandle,
    pub to: ConnectionHandle,
    pub signal: Signal,
}

// ---------------------------------------------------------------------------
// Chat events
// ---------------------------------------------------------------------------

/// Chat lifecycle and ephemeral events fanned out to channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated {
        message: ChatMessage,
    },
    MessageEdited {
        message: ChatMessage,
    },
    MessageDeleted {
        message_id: String,
        actor_id: String,
    },
    /// Carries the full post-toggle bucket list for the message.
    /// `actor_id` is the user whose toggle produced it.
    ReactionChanged {
        message_id: String,
        actor_id: String,
        reactions: Vec<ReactionBucket>,
    },
    ReadReceiptUpdated {
        receipt: ReadReceipt,
    },
    TypingPing {
        user_id: String,
        display_name: String,
    },
    MuteChanged {
        handle: ConnectionHandle,
        user_id: String,
        muted: bool,
    },
}

impl ChatEvent {
    /// Whether the connection that published this event receives it too.
    ///
    /// Durable events echo so the sender sees server-confirmed state;
    /// typing and mute indicators only matter to everyone else.
    pub fn echoes_to_origin(&self) -> bool {
        !matches!(
            self,
            ChatEvent::TypingPing { .. } | ChatEvent::MuteChanged { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageCreated { .. } => "message_created",
            ChatEvent::MessageEdited { .. } => "message_edited",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::ReactionChanged { .. } => "reaction_changed",
            ChatEvent::ReadReceiptUpdated { .. } => "read_receipt_updated",
            ChatEvent::TypingPing { .. } => "typing_ping",
            ChatEvent::MuteChanged { .. } => "mute_changed",
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame on a new connection.
    Hello {
        user_id: String,
        display_name: String,
        #[serde(default)]
        avatar: Option<String>,
    },
    /// Who joins is taken from the connection's `hello`.
    JoinVoice {
        channel: String,
        #[serde(default)]
        muted: bool,
    },
    LeaveVoice {
        channel: String,
    },
    RelaySignal {
        channel: String,
        to: ConnectionHandle,
        signal: Signal,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Publish {
        channel: String,
        event: ChatEvent,
    },
    SetMute {
        channel: String,
        muted: bool,
    },
}

/// Frames the hub pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        handle: ConnectionHandle,
    },
    /// Full roster snapshot, sent after every presence change.
    Roster {
        channel: String,
        participants: Vec<Participant>,
    },
    Signal {
        envelope: SignalingEnvelope,
    },
    ChatEvent {
        channel: String,
        event: ChatEvent,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_wire_format() {
        let json = r#"{"type":"hello","user_id":"u1","display_name":"Ada"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Hello {
                user_id: "u1".into(),
                display_name: "Ada".into(),
                avatar: None,
            }
        );
    }

    #[test]
    fn relay_signal_wire_format() {
        let json = r#"{"type":"relay_signal","channel":"voice-1","to":"s2","signal":{"kind":"offer","sdp":"v=0"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::RelaySignal { channel, to, signal } => {
                assert_eq!(channel, "voice-1");
                assert_eq!(to, ConnectionHandle::from("s2"));
                assert_eq!(signal.kind(), SignalKind::Offer);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ice_candidate_uses_snake_case_kind() {
        let signal = Signal::IceCandidate {
            candidate: "candidate:1".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["kind"], "ice_candidate");
    }

    #[test]
    fn roster_frame_is_type_tagged() {
        let msg = ServerMessage::Roster {
            channel: "voice-1".into(),
            participants: vec![Participant {
                handle: "s1".into(),
                user_id: "u1".into(),
                display_name: "Ada".into(),
                avatar: None,
                muted: false,
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "roster");
        assert_eq!(json["participants"][0]["handle"], "s1");
        assert!(json["participants"][0].get("avatar").is_none());
    }

    #[test]
    fn chat_event_frame_nests_kind() {
        let msg = ServerMessage::ChatEvent {
            channel: "general".into(),
            event: ChatEvent::MessageDeleted {
                message_id: "m1".into(),
                actor_id: "u2".into(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat_event");
        assert_eq!(json["event"]["kind"], "message_deleted");
        assert_eq!(json["event"]["actor_id"], "u2");
    }

    #[test]
    fn reaction_changed_names_the_actor() {
        let json = r#"{"kind":"reaction_changed","message_id":"m1","actor_id":"u2","reactions":[{"emoji":"👍","user_ids":["u2"]}]}"#;
        match serde_json::from_str::<ChatEvent>(json).unwrap() {
            ChatEvent::ReactionChanged {
                actor_id, reactions, ..
            } => {
                assert_eq!(actor_id, "u2");
                assert_eq!(reactions[0].user_ids, vec!["u2"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn join_voice_carries_no_identity() {
        let json = r#"{"type":"join_voice","channel":"voice-1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinVoice {
                channel: "voice-1".into(),
                muted: false,
            }
        );
    }

    #[test]
    fn echo_policy() {
        let typing = ChatEvent::TypingPing {
            user_id: "u1".into(),
            display_name: "Ada".into(),
        };
        assert!(!typing.echoes_to_origin());

        let mute = ChatEvent::MuteChanged {
            handle: "s1".into(),
            user_id: "u1".into(),
            muted: true,
        };
        assert!(!mute.echoes_to_origin());

        let deleted = ChatEvent::MessageDeleted {
            message_id: "m1".into(),
            actor_id: "u2".into(),
        };
        assert!(deleted.echoes_to_origin());
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let json = r#"{"type":"teleport","channel":"x"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}
