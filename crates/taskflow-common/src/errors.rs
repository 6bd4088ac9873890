use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Signaling envelopes the relay refuses to forward.
///
/// A target that has already gone away is not an error: the envelope is
/// simply dropped and reported as such by the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("connection {0} attempted to signal itself")]
    SelfSignal(String),

    #[error("sender {0} is not registered")]
    NotRegistered(String),
}

/// Failures local to one participant's mesh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshError {
    #[error("microphone access denied: {0}")]
    MediaAcquisitionDenied(String),

    #[error("negotiation with {peer} failed: {reason}")]
    Negotiation { peer: String, reason: String },

    #[error("hub unavailable: {0}")]
    HubUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("no hello within {0}s")]
    HelloTimeout(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}
