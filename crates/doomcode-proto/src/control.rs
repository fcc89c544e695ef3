//! Plaintext control frames.
//!
//! Control frames drive session lifecycle on the relay. They share the
//! transport with envelope frames and are distinguished by the `action` tag.

use serde::{Deserialize, Serialize};

use crate::envelope::Role;
use crate::error::ProtoError;

/// Control frames sent by a client (controller or operator) to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientControl {
    /// Allocate a fresh session; controller only.
    #[serde(rename_all = "camelCase")]
    Create { public_key: String },

    /// Join an existing session in the given role.
    #[serde(rename_all = "camelCase")]
    Join {
        session_id: String,
        role: Role,
        public_key: String,
    },

    /// Equivalent to closing the connection.
    Leave,

    /// Delete queued envelopes up to and including `last_message_id`.
    #[serde(rename_all = "camelCase")]
    Ack {
        session_id: String,
        last_message_id: String,
    },

    /// Ask how many envelopes are queued for this session.
    #[serde(rename_all = "camelCase")]
    QueueStatus { session_id: String },
}

impl ClientControl {
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Control frames sent by the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RelayControl {
    #[serde(rename_all = "camelCase")]
    SessionCreated { session_id: String },

    /// Reply to a successful join; `peer_public_key` present iff the peer
    /// slot is filled.
    #[serde(rename_all = "camelCase")]
    SessionJoined {
        #[serde(skip_serializing_if = "Option::is_none")]
        peer_public_key: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PeerConnected {
        peer_public_key: String,
        peer_type: Role,
    },

    #[serde(rename_all = "camelCase")]
    PeerDisconnected { peer_type: Role },

    #[serde(rename_all = "camelCase")]
    QueueStatus {
        queued_messages: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        oldest_timestamp: Option<i64>,
    },

    Error { code: ErrorCode, message: String },

    /// Liveness probe of an incumbent slot holder.
    Ping,
}

impl RelayControl {
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Stable error codes carried by `error` frames. Fatal at the session level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    AlreadyConnected,
    NotJoined,
    InternalError,
}
