//! In-memory connection registry.
//!
//! Maps transport connection ids to the outbound frame channel of the writer
//! task serving that socket. The store owns the durable state; this registry
//! only knows who is reachable right now.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// A live connection: the sender feeding its writer task.
pub struct RelayConnection {
    pub connection_id: String,
    frame_tx: mpsc::Sender<String>,
}

impl RelayConnection {
    pub fn new(connection_id: String, frame_tx: mpsc::Sender<String>) -> Self {
        Self {
            connection_id,
            frame_tx,
        }
    }

    /// Push a text frame to this connection's writer task.
    ///
    /// An error means the writer task is gone, which is the transport-level
    /// `Gone` signal the liveness probe watches for.
    pub async fn send_frame(&self, frame: String) -> Result<(), mpsc::error::SendError<String>> {
        self.frame_tx.send(frame).await
    }
}

/// Thread-safe registry of live connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel.
    pub async fn register(
        &self,
        connection_id: String,
        frame_tx: mpsc::Sender<String>,
    ) -> Arc<RelayConnection> {
        let conn = Arc::new(RelayConnection::new(connection_id.clone(), frame_tx));
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), Arc::clone(&conn));
        debug!(connection_id = %connection_id, "Connection registered");
        conn
    }

    /// Remove a connection.
    pub async fn unregister(&self, connection_id: &str) -> Option<Arc<RelayConnection>> {
        let conn = self.connections.write().await.remove(connection_id);
        if conn.is_some() {
            debug!(connection_id = %connection_id, "Connection unregistered");
        }
        conn
    }

    /// Get a live connection by id.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<RelayConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Send a frame to a connection; `false` when the connection is absent or
    /// its writer task has exited.
    pub async fn send_to(&self, connection_id: &str, frame: String) -> bool {
        match self.get(connection_id).await {
            Some(conn) => conn.send_frame(frame).await.is_ok(),
            None => {
                warn!(connection_id = %connection_id, "Send to unknown connection");
                false
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
