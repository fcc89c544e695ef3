//! Versioned wire envelope.
//!
//! The envelope is the only object the relay inspects: the header fields
//! drive routing and queueing, the payload stays opaque ciphertext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// The only wire version this build speaks.
pub const ENVELOPE_VERSION: u32 = 1;

/// Nonce length the envelope layer accepts (XSalsa20-Poly1305).
const NONCE_LEN: usize = 24;

/// The two parties of a session. Doubles as the envelope `sender` tag and
/// the join `role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Controller,
    Operator,
}

impl Role {
    /// The other party.
    pub const fn peer(self) -> Self {
        match self {
            Self::Controller => Self::Operator,
            Self::Operator => Self::Controller,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An envelope frame: opaque ciphertext plus the routing header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u32,
    pub session_id: String,
    /// Unique per envelope; the operator acks queue replay by this id.
    pub message_id: String,
    /// Producer clock, unix milliseconds. Advisory only.
    pub timestamp: i64,
    pub sender: Role,
    /// 24-byte nonce, base64.
    pub nonce: String,
    /// Ciphertext, base64. `ciphertext` is accepted as a legacy alias.
    #[serde(alias = "ciphertext")]
    pub encrypted_payload: String,
}

impl Envelope {
    /// Build a fresh envelope around sealed bytes, minting a new message id
    /// and stamping the producer clock.
    pub fn new(session_id: &str, sender: Role, nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            session_id: session_id.to_string(),
            message_id: doomcode_core::new_id(),
            timestamp: doomcode_core::unix_timestamp_ms(),
            sender,
            nonce: STANDARD.encode(nonce),
            encrypted_payload: STANDARD.encode(ciphertext),
        }
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate an envelope frame.
    ///
    /// Rejects unknown versions, malformed sender tags, non-base64 nonce or
    /// ciphertext, and a nonce of the wrong length.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let envelope: Self = serde_json::from_str(text)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Validate header invariants without re-parsing.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.version != ENVELOPE_VERSION {
            return Err(ProtoError::UnsupportedVersion {
                found: self.version,
            });
        }
        if self.session_id.is_empty() {
            return Err(ProtoError::MissingField("sessionId"));
        }
        if self.message_id.is_empty() {
            return Err(ProtoError::MissingField("messageId"));
        }
        let nonce = STANDARD
            .decode(&self.nonce)
            .map_err(|_| ProtoError::InvalidBase64 { field: "nonce" })?;
        if nonce.len() != NONCE_LEN {
            return Err(ProtoError::InvalidNonceLength {
                expected: NONCE_LEN,
                actual: nonce.len(),
            });
        }
        STANDARD
            .decode(&self.encrypted_payload)
            .map_err(|_| ProtoError::InvalidBase64 {
                field: "encryptedPayload",
            })?;
        Ok(())
    }

    /// Decoded nonce bytes. Call after `validate`.
    pub fn nonce_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        STANDARD
            .decode(&self.nonce)
            .map_err(|_| ProtoError::InvalidBase64 { field: "nonce" })
    }

    /// Decoded ciphertext bytes. Call after `validate`.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        STANDARD
            .decode(&self.encrypted_payload)
            .map_err(|_| ProtoError::InvalidBase64 {
                field: "encryptedPayload",
            })
    }
}

/// Which of the two frame shapes a raw text frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Plaintext control frame (`action` present).
    Control,
    /// Opaque envelope frame (`encryptedPayload` present).
    Envelope,
    /// Neither shape; dropped with a log line.
    Unknown,
}

/// Disambiguate a raw frame by field presence: `action` marks a control
/// frame, `encryptedPayload` (or its `ciphertext` alias) marks an envelope.
pub fn frame_kind(text: &str) -> FrameKind {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return FrameKind::Unknown;
    };
    let Some(obj) = value.as_object() else {
        return FrameKind::Unknown;
    };
    if obj.contains_key("action") {
        FrameKind::Control
    } else if obj.contains_key("encryptedPayload") || obj.contains_key("ciphertext") {
        FrameKind::Envelope
    } else {
        FrameKind::Unknown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new("session-1", Role::Controller, &[7u8; 24], b"ciphertext")
    }

    #[test]
    fn encode_decode_roundtrip() {
        let envelope = sample();
        let text = envelope.encode().unwrap();
        let decoded = Envelope::decode(&text).unwrap();

        assert_eq!(decoded.session_id, "session-1");
        assert_eq!(decoded.message_id, envelope.message_id);
        assert_eq!(decoded.sender, Role::Controller);
        assert_eq!(decoded.nonce_bytes().unwrap(), vec![7u8; 24]);
        assert_eq!(decoded.ciphertext_bytes().unwrap(), b"ciphertext");
    }

    #[test]
    fn wire_form_is_camel_case() {
        let text = sample().encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("sessionId").is_some());
        assert!(value.get("messageId").is_some());
        assert!(value.get("encryptedPayload").is_some());
        assert_eq!(value["version"], 1);
        assert_eq!(value["sender"], "controller");
    }

    #[test]
    fn message_ids_are_fresh() {
        assert_ne!(sample().message_id, sample().message_id);
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut envelope = sample();
        envelope.version = 2;
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            Envelope::decode(&text),
            Err(ProtoError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn decode_rejects_bad_sender() {
        let text = r#"{"version":1,"sessionId":"s","messageId":"m","timestamp":0,
            "sender":"intruder","nonce":"AA==","encryptedPayload":"AA=="}"#;
        assert!(matches!(Envelope::decode(text), Err(ProtoError::Json(_))));
    }

    #[test]
    fn decode_rejects_non_base64_nonce() {
        let mut envelope = sample();
        envelope.nonce = "not base64!!!".into();
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            Envelope::decode(&text),
            Err(ProtoError::InvalidBase64 { field: "nonce" })
        ));
    }

    #[test]
    fn decode_rejects_short_nonce() {
        let envelope = Envelope::new("s", Role::Operator, &[0u8; 12], b"x");
        let text = envelope.encode().unwrap();
        assert!(matches!(
            Envelope::decode(&text),
            Err(ProtoError::InvalidNonceLength {
                expected: 24,
                actual: 12
            })
        ));
    }

    #[test]
    fn decode_rejects_empty_session_id() {
        let envelope = Envelope::new("", Role::Controller, &[0u8; 24], b"x");
        let text = envelope.encode().unwrap();
        assert!(matches!(
            Envelope::decode(&text),
            Err(ProtoError::MissingField("sessionId"))
        ));
    }

    #[test]
    fn ciphertext_alias_is_accepted() {
        let text = format!(
            r#"{{"version":1,"sessionId":"s","messageId":"m","timestamp":0,
                "sender":"operator","nonce":"{}","ciphertext":"AA=="}}"#,
            STANDARD.encode([0u8; 24])
        );
        let envelope = Envelope::decode(&text).unwrap();
        assert_eq!(envelope.ciphertext_bytes().unwrap(), vec![0u8]);
    }

    #[test]
    fn frame_kind_by_field_presence() {
        assert_eq!(frame_kind(r#"{"action":"join"}"#), FrameKind::Control);
        assert_eq!(
            frame_kind(r#"{"encryptedPayload":"AA=="}"#),
            FrameKind::Envelope
        );
        assert_eq!(frame_kind(r#"{"ciphertext":"AA=="}"#), FrameKind::Envelope);
        assert_eq!(frame_kind(r#"{"something":"else"}"#), FrameKind::Unknown);
        assert_eq!(frame_kind("not json"), FrameKind::Unknown);
        assert_eq!(frame_kind("[1,2,3]"), FrameKind::Unknown);
    }

    #[test]
    fn role_peer_flips() {
        assert_eq!(Role::Controller.peer(), Role::Operator);
        assert_eq!(Role::Operator.peer(), Role::Controller);
    }
}
