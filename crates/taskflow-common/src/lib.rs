pub mod chat;
pub mod errors;
pub mod id;
pub mod protocol;

pub use chat::{
    toggle_reaction, upsert_read_receipt, Attachment, ChatMessage, ReactionBucket, ReadReceipt,
};
pub use errors::{ConfigError, MeshError, ProtocolError, RelayError, TaskflowError};
pub use id::{new_id, ConnectionHandle};
pub use protocol::{
    ChatEvent, ClientMessage, Participant, ServerMessage, Signal, SignalKind, SignalingEnvelope,
};

pub type Result<T> = std::result::Result<T, TaskflowError>;
