//! Relay server: HTTP bootstrap routes plus the duplex frame transport.

mod handlers;
mod http;
mod ws;

pub use handlers::{
    handle_disconnect, handle_text_frame, AppState, ConnectionCtx, FrameOutcome,
};

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;
use crate::storage::RelayDatabase;

/// How often expired sessions and queue rows are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the relay router over shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/session", post(http::create_session))
        .route("/session/:id", get(http::get_session))
        .route("/health", get(http::health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Spawn the periodic expiry sweeper.
pub fn spawn_expiry_sweeper(db: RelayDatabase) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.tick().await; // skip the immediate first tick
        loop {
            timer.tick().await;
            match db.cleanup_expired_queue().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Swept expired queued envelopes");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Queue sweep failed"),
            }
            match db.cleanup_expired_sessions().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Swept expired sessions");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Session sweep failed"),
            }
        }
    })
}

/// Bind and serve until ctrl-c.
pub async fn run(addr: SocketAddr, db: RelayDatabase) -> anyhow::Result<()> {
    let state = AppState {
        db: db.clone(),
        registry: ConnectionRegistry::new(),
    };
    let router = build_router(state);

    let sweeper = spawn_expiry_sweeper(db);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Relay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
