//! Session and connection queries.
//!
//! Every slot mutation is a single guarded UPDATE so concurrent joins for the
//! same role serialize inside SQLite; the loser sees zero rows affected.

use doomcode_core::unix_timestamp;
use doomcode_proto::Role;

use super::db::{DatabaseError, RelayDatabase};
use super::models::{ConnectionRow, SessionRow};

/// Session lifetime in seconds.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

impl RelayDatabase {
    /// Create a session with the fixed 24 h TTL and return its row.
    pub async fn create_session(&self, id: &str) -> Result<SessionRow, DatabaseError> {
        let now = unix_timestamp();
        sqlx::query("INSERT INTO sessions (id, created_at, expires_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(now)
            .bind(now + SESSION_TTL_SECS)
            .execute(self.pool())
            .await?;

        self.get_session(id).await
    }

    /// Fetch a session row; `NotFound` when absent.
    pub async fn get_session(&self, id: &str) -> Result<SessionRow, DatabaseError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("session {id}")))
    }

    /// Fetch a live (non-expired) session; `NotFound` when absent or expired.
    pub async fn get_live_session(&self, id: &str) -> Result<SessionRow, DatabaseError> {
        let session = self.get_session(id).await?;
        if session.is_expired(unix_timestamp()) {
            return Err(DatabaseError::NotFound(format!("session {id}")));
        }
        Ok(session)
    }

    /// Bind a connection and public key to a session slot.
    ///
    /// Single guarded UPDATE: fails with `SlotOccupied` when the slot is
    /// already filled, `NotFound` when the session is absent or expired.
    pub async fn set_session_slot(
        &self,
        session_id: &str,
        role: Role,
        connection_id: &str,
        public_key: &str,
    ) -> Result<(), DatabaseError> {
        let query = match role {
            Role::Controller => {
                "UPDATE sessions SET controller_connection_id = ?, controller_public_key = ? \
                 WHERE id = ? AND expires_at > ? AND controller_connection_id IS NULL"
            }
            Role::Operator => {
                "UPDATE sessions SET operator_connection_id = ?, operator_public_key = ?, \
                 last_operator_public_key = ? \
                 WHERE id = ? AND expires_at > ? AND operator_connection_id IS NULL"
            }
        };

        let now = unix_timestamp();
        let result = match role {
            Role::Controller => {
                sqlx::query(query)
                    .bind(connection_id)
                    .bind(public_key)
                    .bind(session_id)
                    .bind(now)
                    .execute(self.pool())
                    .await?
            }
            Role::Operator => {
                sqlx::query(query)
                    .bind(connection_id)
                    .bind(public_key)
                    .bind(public_key)
                    .bind(session_id)
                    .bind(now)
                    .execute(self.pool())
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            // Distinguish an occupied slot from a dead session.
            let session = self.get_session(session_id).await?;
            if session.is_expired(now) {
                return Err(DatabaseError::NotFound(format!("session {session_id}")));
            }
            return Err(DatabaseError::SlotOccupied(format!(
                "{role} slot of session {session_id}"
            )));
        }
        Ok(())
    }

    /// Clear a session slot, but only while `connection_id` still holds it.
    ///
    /// The operator's `last_operator_public_key` memory survives the clear.
    /// Returns whether a slot was actually cleared.
    pub async fn clear_session_slot(
        &self,
        session_id: &str,
        role: Role,
        connection_id: &str,
    ) -> Result<bool, DatabaseError> {
        let query = match role {
            Role::Controller => {
                "UPDATE sessions SET controller_connection_id = NULL, controller_public_key = NULL \
                 WHERE id = ? AND controller_connection_id = ?"
            }
            Role::Operator => {
                "UPDATE sessions SET operator_connection_id = NULL, operator_public_key = NULL \
                 WHERE id = ? AND operator_connection_id = ?"
            }
        };

        let result = sqlx::query(query)
            .bind(session_id)
            .bind(connection_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove sessions past their expiry, with their queues. Returns the
    /// number of sessions removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "DELETE FROM queued_envelopes WHERE session_id IN \
             (SELECT id FROM sessions WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        sqlx::query(
            "DELETE FROM connections WHERE session_id IN \
             (SELECT id FROM sessions WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Connection queries
    // =========================================================================

    pub async fn put_connection(
        &self,
        connection_id: &str,
        session_id: &str,
        role: Role,
        public_key: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT OR REPLACE INTO connections (id, session_id, role, public_key, connected_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(connection_id)
        .bind(session_id)
        .bind(role.as_str())
        .bind(public_key)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionRow>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, ConnectionRow>("SELECT * FROM connections WHERE id = ?")
                .bind(connection_id)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    pub async fn delete_connection(&self, connection_id: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(connection_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
