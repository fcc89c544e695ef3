//! Row types for the relay store.

use doomcode_proto::Role;
use sqlx::FromRow;

/// A session row. Slots are the nullable column pairs.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub controller_connection_id: Option<String>,
    pub controller_public_key: Option<String>,
    pub operator_connection_id: Option<String>,
    pub operator_public_key: Option<String>,
    pub last_operator_public_key: Option<String>,
}

impl SessionRow {
    /// The connection currently holding the slot for `role`, if any.
    pub fn slot_connection(&self, role: Role) -> Option<&str> {
        match role {
            Role::Controller => self.controller_connection_id.as_deref(),
            Role::Operator => self.operator_connection_id.as_deref(),
        }
    }

    /// The public key bound to the slot for `role`, if any.
    pub fn slot_public_key(&self, role: Role) -> Option<&str> {
        match role {
            Role::Controller => self.controller_public_key.as_deref(),
            Role::Operator => self.operator_public_key.as_deref(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// A connection row, created on join and destroyed on disconnect.
#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRow {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub public_key: String,
    pub connected_at: i64,
}

impl ConnectionRow {
    pub fn role(&self) -> Option<Role> {
        match self.role.as_str() {
            "controller" => Some(Role::Controller),
            "operator" => Some(Role::Operator),
            _ => None,
        }
    }
}

/// A queued envelope awaiting an absent operator.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedEnvelopeRow {
    pub id: i64,
    pub session_id: String,
    pub message_id: String,
    /// The serialized envelope frame, forwarded verbatim on replay.
    pub envelope: String,
    pub queued_at: i64,
    pub expires_at: i64,
}
