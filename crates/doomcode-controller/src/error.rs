//! Controller error types.

use thiserror::Error;

/// Errors from controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Relay HTTP error: {0}")]
    RelayHttp(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay protocol error [{code}]: {message}")]
    RelayProtocol { code: String, message: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] doomcode_crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Proto(#[from] doomcode_proto::ProtoError),

    #[error("Assistant binary not found: {name}")]
    AgentNotFound { name: String },

    #[error("Failed to spawn assistant: {reason}")]
    SpawnFailed { reason: String },

    #[error("PTY write failed: {0}")]
    PtyWrite(String),

    #[error("Session cache error: {0}")]
    SessionCache(String),

    #[error("Patch apply error: {0}")]
    PatchApply(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
