//! One-shot pairing payload.
//!
//! Produced by the controller on start, rendered as a scannable code plus a
//! textual fallback, consumed by the operator to connect. Expires five
//! minutes after minting.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Pairing payload lifetime in milliseconds.
pub const PAIRING_TTL_MS: i64 = 5 * 60 * 1000;

/// The pairing bundle the operator scans or types in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPayload {
    pub session_id: String,
    /// Controller public key, base64 of 32 bytes.
    pub public_key: String,
    /// ws or wss URL of the relay.
    pub relay_url: String,
    /// Absolute expiry, unix milliseconds.
    pub expires_at: i64,
}

impl PairingPayload {
    /// Mint a pairing payload expiring five minutes from now.
    pub fn new(session_id: &str, public_key_b64: &str, relay_url: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            public_key: public_key_b64.to_string(),
            relay_url: relay_url.to_string(),
            expires_at: doomcode_core::unix_timestamp_ms() + PAIRING_TTL_MS,
        }
    }

    /// Whether the payload has passed its absolute expiry.
    pub fn is_expired(&self) -> bool {
        doomcode_core::unix_timestamp_ms() > self.expires_at
    }

    /// Serialize to the wire-form JSON string.
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a scanned or pasted pairing string.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let payload: Self = serde_json::from_str(text)?;
        if payload.session_id.is_empty() {
            return Err(ProtoError::MissingField("sessionId"));
        }
        if payload.public_key.is_empty() {
            return Err(ProtoError::MissingField("publicKey"));
        }
        if payload.relay_url.is_empty() {
            return Err(ProtoError::MissingField("relayUrl"));
        }
        Ok(payload)
    }
}
