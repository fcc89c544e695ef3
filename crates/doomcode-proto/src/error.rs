//! Protocol error types.

use thiserror::Error;

/// Errors from encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Unsupported envelope version: {found}")]
    UnsupportedVersion { found: u32 },

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not valid base64")]
    InvalidBase64 { field: &'static str },

    #[error("Invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
