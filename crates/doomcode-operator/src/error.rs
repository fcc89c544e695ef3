//! Operator client error types.

use thiserror::Error;

/// Errors from operator session operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("Pairing error: {0}")]
    Pairing(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay protocol error [{code}]: {message}")]
    RelayProtocol { code: String, message: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] doomcode_crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Proto(#[from] doomcode_proto::ProtoError),
}
