//! WebSocket transport plumbing.
//!
//! Each accepted socket gets a writer task fed by an `mpsc` channel that is
//! registered in the connection registry; the read loop feeds frames into the
//! handlers. The handlers never touch the socket type directly.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::handlers::{handle_disconnect, handle_text_frame, AppState, ConnectionCtx, FrameOutcome};

/// Outbound channel depth per connection.
const OUTBOUND_BUFFER: usize = 128;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = doomcode_core::new_id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    state
        .registry
        .register(connection_id.clone(), frame_tx)
        .await;

    let writer_connection = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %writer_connection, "Writer task finished");
    });

    let mut ctx = ConnectionCtx::new(connection_id.clone());

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if handle_text_frame(&state, &mut ctx, &text).await == FrameOutcome::Close {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "Client closed websocket");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Websocket read error");
                break;
            }
        }
    }

    handle_disconnect(&state, &ctx).await;
    writer.abort();
}
