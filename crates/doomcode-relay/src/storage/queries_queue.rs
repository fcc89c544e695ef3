//! Offline envelope queue queries.
//!
//! Envelopes sent by the controller while the operator slot is empty are
//! held here and replayed on the next operator join. TTL is authoritative:
//! an expired row is never replayed even if still indexed.

use doomcode_core::unix_timestamp;

use super::db::{DatabaseError, RelayDatabase};
use super::models::QueuedEnvelopeRow;

/// Queued envelope lifetime in seconds.
pub const QUEUE_TTL_SECS: i64 = 24 * 60 * 60;

impl RelayDatabase {
    /// Queue a serialized envelope frame for later delivery.
    pub async fn enqueue(
        &self,
        session_id: &str,
        message_id: &str,
        envelope_json: &str,
    ) -> Result<i64, DatabaseError> {
        let now = unix_timestamp();
        let result = sqlx::query(
            "INSERT INTO queued_envelopes (session_id, message_id, envelope, queued_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(message_id)
        .bind(envelope_json)
        .bind(now)
        .bind(now + QUEUE_TTL_SECS)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List live queued envelopes in arrival order.
    pub async fn list_queue(
        &self,
        session_id: &str,
    ) -> Result<Vec<QueuedEnvelopeRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, QueuedEnvelopeRow>(
            "SELECT * FROM queued_envelopes WHERE session_id = ? AND expires_at > ? \
             ORDER BY queued_at ASC, id ASC",
        )
        .bind(session_id)
        .bind(unix_timestamp())
        .fetch_all(self.pool())
        .await?)
    }

    /// Delete queued envelopes up to and including `message_id`.
    ///
    /// Idempotent: an absent id deletes nothing. Returns the number of rows
    /// removed.
    pub async fn delete_queued_up_to(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM queued_envelopes WHERE session_id = ?1 AND id <= \
             (SELECT id FROM queued_envelopes WHERE session_id = ?1 AND message_id = ?2)",
        )
        .bind(session_id)
        .bind(message_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Drop the whole queue for a session. Returns the number removed.
    pub async fn purge_queue(&self, session_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM queued_envelopes WHERE session_id = ?")
            .bind(session_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Count live queued envelopes for a session.
    pub async fn count_queued(&self, session_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queued_envelopes WHERE session_id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(row.0)
    }

    /// Oldest live queued timestamp (unix seconds), if any.
    pub async fn oldest_queued_at(&self, session_id: &str) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT queued_at FROM queued_envelopes WHERE session_id = ? AND expires_at > ? \
             ORDER BY queued_at ASC, id ASC LIMIT 1",
        )
        .bind(session_id)
        .bind(unix_timestamp())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(t,)| t))
    }

    /// Remove expired queue rows. Returns the count removed.
    pub async fn cleanup_expired_queue(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM queued_envelopes WHERE expires_at <= ?")
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn db() -> RelayDatabase {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        db.create_session("s1").await.unwrap();
        db
    }

    #[tokio::test]
    async fn enqueue_and_list_in_order() {
        let db = db().await;
        db.enqueue("s1", "m1", "{\"n\":1}").await.unwrap();
        db.enqueue("s1", "m2", "{\"n\":2}").await.unwrap();
        db.enqueue("s1", "m3", "{\"n\":3}").await.unwrap();

        let rows = db.list_queue("s1").await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert_eq!(db.count_queued("s1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_up_to_is_inclusive_and_ordered() {
        let db = db().await;
        for id in ["m1", "m2", "m3"] {
            db.enqueue("s1", id, "{}").await.unwrap();
        }

        let removed = db.delete_queued_up_to("s1", "m2").await.unwrap();
        assert_eq!(removed, 2);

        let rows = db.list_queue("s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message_id, "m3");
    }

    #[tokio::test]
    async fn delete_up_to_absent_id_is_a_noop() {
        let db = db().await;
        db.enqueue("s1", "m1", "{}").await.unwrap();

        let removed = db.delete_queued_up_to("s1", "missing").await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(db.count_queued("s1").await.unwrap(), 1);

        // Re-acking an already-deleted id is also a no-op.
        db.delete_queued_up_to("s1", "m1").await.unwrap();
        let removed = db.delete_queued_up_to("s1", "m1").await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn purge_empties_the_queue() {
        let db = db().await;
        db.enqueue("s1", "m1", "{}").await.unwrap();
        db.enqueue("s1", "m2", "{}").await.unwrap();

        assert_eq!(db.purge_queue("s1").await.unwrap(), 2);
        assert_eq!(db.count_queued("s1").await.unwrap(), 0);
        assert!(db.oldest_queued_at("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_and_swept() {
        let db = db().await;
        db.enqueue("s1", "m1", "{}").await.unwrap();
        db.enqueue("s1", "m2", "{}").await.unwrap();
        sqlx::query("UPDATE queued_envelopes SET expires_at = 0 WHERE message_id = 'm1'")
            .execute(db.pool())
            .await
            .unwrap();

        // Expired rows never replay even while still indexed.
        let rows = db.list_queue("s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message_id, "m2");
        assert_eq!(db.count_queued("s1").await.unwrap(), 1);

        assert_eq!(db.cleanup_expired_queue().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn oldest_timestamp_tracks_head() {
        let db = db().await;
        assert!(db.oldest_queued_at("s1").await.unwrap().is_none());
        db.enqueue("s1", "m1", "{}").await.unwrap();
        let oldest = db.oldest_queued_at("s1").await.unwrap();
        assert!(oldest.is_some());
    }

    #[tokio::test]
    async fn queues_are_per_session() {
        let db = db().await;
        db.create_session("s2").await.unwrap();
        db.enqueue("s1", "m1", "{}").await.unwrap();
        db.enqueue("s2", "m2", "{}").await.unwrap();

        db.purge_queue("s1").await.unwrap();
        assert_eq!(db.count_queued("s2").await.unwrap(), 1);
    }
}
