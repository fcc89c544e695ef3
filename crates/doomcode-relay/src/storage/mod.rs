//! Relay state store: sessions, connections and the offline envelope queue.

mod db;
mod models;
mod queries;
mod queries_queue;

pub use db::{DatabaseError, RelayDatabase};
pub use models::{ConnectionRow, QueuedEnvelopeRow, SessionRow};
pub use queries::SESSION_TTL_SECS;
pub use queries_queue::QUEUE_TTL_SECS;
