//! Per-connection frame handlers.
//!
//! A connection is born anonymous; its first frame must be a control frame
//! (`create` or `join`). After that, control frames drive lifecycle and
//! envelope frames are routed by header only. All replies and notifications
//! travel through the connection registry so the logic here is independent
//! of the actual socket type.

use doomcode_proto::{
    frame_kind, ClientControl, Envelope, ErrorCode, FrameKind, RelayControl, Role,
};
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;
use crate::storage::{DatabaseError, RelayDatabase};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: RelayDatabase,
    pub registry: ConnectionRegistry,
}

/// Mutable per-connection context.
pub struct ConnectionCtx {
    pub connection_id: String,
    /// Set once the connection has created or joined a session.
    pub joined: Option<(String, Role)>,
}

impl ConnectionCtx {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            joined: None,
        }
    }
}

/// What the transport loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Close,
}

/// Dispatch one inbound text frame.
pub async fn handle_text_frame(
    state: &AppState,
    ctx: &mut ConnectionCtx,
    text: &str,
) -> FrameOutcome {
    match frame_kind(text) {
        FrameKind::Control => match ClientControl::decode(text) {
            Ok(control) => handle_control(state, ctx, control).await,
            Err(e) => {
                warn!(connection_id = %ctx.connection_id, error = %e, "Malformed control frame");
                FrameOutcome::Continue
            }
        },
        FrameKind::Envelope => handle_envelope(state, ctx, text).await,
        FrameKind::Unknown => {
            debug!(connection_id = %ctx.connection_id, "Dropping unrecognized frame");
            FrameOutcome::Continue
        }
    }
}

async fn handle_control(
    state: &AppState,
    ctx: &mut ConnectionCtx,
    control: ClientControl,
) -> FrameOutcome {
    match control {
        ClientControl::Create { public_key } => handle_create(state, ctx, &public_key).await,
        ClientControl::Join {
            session_id,
            role,
            public_key,
        } => handle_join(state, ctx, &session_id, role, &public_key).await,
        ClientControl::Leave => FrameOutcome::Close,
        ClientControl::Ack {
            session_id,
            last_message_id,
        } => handle_ack(state, ctx, &session_id, &last_message_id).await,
        ClientControl::QueueStatus { session_id } => {
            handle_queue_status(state, ctx, &session_id).await
        }
    }
}

/// `create {publicKey}`: allocate a fresh session and take its controller
/// slot in one step.
async fn handle_create(state: &AppState, ctx: &mut ConnectionCtx, public_key: &str) -> FrameOutcome {
    if ctx.joined.is_some() {
        return send_error(
            state,
            ctx,
            ErrorCode::InternalError,
            "connection already joined a session",
        )
        .await;
    }

    let session_id = doomcode_core::new_id();
    let result = async {
        state.db.create_session(&session_id).await?;
        state
            .db
            .set_session_slot(&session_id, Role::Controller, &ctx.connection_id, public_key)
            .await?;
        state
            .db
            .put_connection(&ctx.connection_id, &session_id, Role::Controller, public_key)
            .await
    }
    .await;

    if let Err(e) = result {
        warn!(connection_id = %ctx.connection_id, error = %e, "Session create failed");
        return send_error(state, ctx, ErrorCode::InternalError, "session create failed").await;
    }

    ctx.joined = Some((session_id.clone(), Role::Controller));
    info!(session_id = %session_id, connection_id = %ctx.connection_id, "Session created");

    reply(state, ctx, &RelayControl::SessionCreated { session_id }).await
}

/// `join {sessionId, role, publicKey}` with incumbent probing and, for the
/// operator role, the key-rotation queue purge.
async fn handle_join(
    state: &AppState,
    ctx: &mut ConnectionCtx,
    session_id: &str,
    role: Role,
    public_key: &str,
) -> FrameOutcome {
    if ctx.joined.is_some() {
        return send_error(
            state,
            ctx,
            ErrorCode::InternalError,
            "connection already joined a session",
        )
        .await;
    }

    let session = match state.db.get_live_session(session_id).await {
        Ok(session) => session,
        Err(DatabaseError::NotFound(_)) => {
            return send_error(state, ctx, ErrorCode::SessionNotFound, "no such session").await;
        }
        Err(e) => {
            warn!(error = %e, "Session lookup failed");
            return send_error(state, ctx, ErrorCode::InternalError, "session lookup failed")
                .await;
        }
    };

    // An occupied slot triggers a liveness probe of the incumbent. A probe
    // frame that cannot be delivered is the transport-level `Gone`; anything
    // else means the incumbent is alive and the join is rejected.
    if let Some(incumbent) = session.slot_connection(role).map(str::to_string) {
        if probe_is_alive(state, &incumbent).await {
            return send_error(state, ctx, ErrorCode::AlreadyConnected, "slot is occupied").await;
        }
        info!(
            session_id = %session_id,
            role = %role,
            incumbent = %incumbent,
            "Evicting unreachable incumbent"
        );
        evict_connection(state, session_id, role, &incumbent).await;
    }

    // Key-rotation invariant: queued ciphertexts were sealed to the old
    // operator key and are forever unreadable under a new one. Purge before
    // any replay can happen.
    if role == Role::Operator {
        let known = session.last_operator_public_key.as_deref();
        if known.is_some() && known != Some(public_key) {
            match state.db.purge_queue(session_id).await {
                Ok(purged) => {
                    info!(session_id = %session_id, purged, "Operator key rotated, queue purged");
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Queue purge failed");
                    return send_error(state, ctx, ErrorCode::InternalError, "queue purge failed")
                        .await;
                }
            }
        }
    }

    let result = async {
        state
            .db
            .set_session_slot(session_id, role, &ctx.connection_id, public_key)
            .await?;
        state
            .db
            .put_connection(&ctx.connection_id, session_id, role, public_key)
            .await
    }
    .await;

    match result {
        Ok(()) => {}
        Err(DatabaseError::SlotOccupied(_)) => {
            // A concurrent join won the slot between our probe and our update.
            return send_error(state, ctx, ErrorCode::AlreadyConnected, "slot is occupied").await;
        }
        Err(DatabaseError::NotFound(_)) => {
            return send_error(state, ctx, ErrorCode::SessionNotFound, "no such session").await;
        }
        Err(e) => {
            warn!(error = %e, "Slot update failed");
            return send_error(state, ctx, ErrorCode::InternalError, "slot update failed").await;
        }
    }

    ctx.joined = Some((session_id.to_string(), role));
    info!(session_id = %session_id, role = %role, connection_id = %ctx.connection_id, "Joined session");

    // Reply with the peer key when the peer slot is already filled, and tell
    // the peer who arrived.
    let peer_role = role.peer();
    let peer_key = session.slot_public_key(peer_role).map(str::to_string);
    let peer_conn = session.slot_connection(peer_role).map(str::to_string);

    let outcome = reply(
        state,
        ctx,
        &RelayControl::SessionJoined {
            peer_public_key: peer_key.clone(),
        },
    )
    .await;
    if outcome == FrameOutcome::Close {
        return outcome;
    }

    if let (Some(peer_conn), Some(_)) = (peer_conn, peer_key) {
        notify(
            state,
            &peer_conn,
            &RelayControl::PeerConnected {
                peer_public_key: public_key.to_string(),
                peer_type: role,
            },
        )
        .await;
    }

    // The operator drains the queue on join: status first, then the
    // envelopes in arrival order. Rows stay queued until acked.
    if role == Role::Operator {
        let outcome = send_queue_status(state, ctx, session_id).await;
        if outcome == FrameOutcome::Close {
            return outcome;
        }
        return replay_queue(state, ctx, session_id).await;
    }

    FrameOutcome::Continue
}

/// `ack {sessionId, lastMessageId}`: drop replayed envelopes the operator has
/// seen. An unknown id is a no-op, not an error.
async fn handle_ack(
    state: &AppState,
    ctx: &mut ConnectionCtx,
    session_id: &str,
    last_message_id: &str,
) -> FrameOutcome {
    let Some((joined_session, _)) = &ctx.joined else {
        return send_error(state, ctx, ErrorCode::NotJoined, "join a session first").await;
    };
    if joined_session != session_id {
        return send_error(state, ctx, ErrorCode::NotJoined, "ack for a different session").await;
    }

    match state.db.delete_queued_up_to(session_id, last_message_id).await {
        Ok(removed) => {
            debug!(session_id = %session_id, last_message_id = %last_message_id, removed, "Ack processed");
            FrameOutcome::Continue
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Ack failed");
            send_error(state, ctx, ErrorCode::InternalError, "ack failed").await
        }
    }
}

async fn handle_queue_status(
    state: &AppState,
    ctx: &mut ConnectionCtx,
    session_id: &str,
) -> FrameOutcome {
    let Some((joined_session, _)) = &ctx.joined else {
        return send_error(state, ctx, ErrorCode::NotJoined, "join a session first").await;
    };
    if joined_session != session_id {
        return send_error(state, ctx, ErrorCode::NotJoined, "status for a different session")
            .await;
    }
    send_queue_status(state, ctx, session_id).await
}

/// Route one envelope frame: forward to the peer when its slot is filled,
/// queue controller traffic for an absent operator, drop operator traffic
/// for an absent controller.
async fn handle_envelope(state: &AppState, ctx: &mut ConnectionCtx, text: &str) -> FrameOutcome {
    let Some((session_id, role)) = ctx.joined.clone() else {
        return send_error(state, ctx, ErrorCode::NotJoined, "join a session first").await;
    };

    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Validation failures never crash the connection.
            warn!(connection_id = %ctx.connection_id, error = %e, "Dropping invalid envelope");
            return FrameOutcome::Continue;
        }
    };

    if envelope.session_id != session_id {
        warn!(
            connection_id = %ctx.connection_id,
            envelope_session = %envelope.session_id,
            "Dropping envelope for a different session"
        );
        return FrameOutcome::Continue;
    }

    // The sender tag must match the slot this connection occupies; routing
    // trusts the connection, not the frame.
    if envelope.sender != role {
        warn!(
            connection_id = %ctx.connection_id,
            claimed = %envelope.sender,
            actual = %role,
            "Dropping envelope with forged sender"
        );
        return FrameOutcome::Continue;
    }

    let session = match state.db.get_live_session(&session_id).await {
        Ok(session) => session,
        Err(_) => {
            return send_error(state, ctx, ErrorCode::SessionNotFound, "session expired").await;
        }
    };

    let peer_conn = session.slot_connection(role.peer()).map(str::to_string);
    let delivered = match peer_conn {
        Some(peer) => state.registry.send_to(&peer, text.to_string()).await,
        None => false,
    };

    if delivered {
        return FrameOutcome::Continue;
    }

    match role {
        Role::Controller => {
            if let Err(e) = state
                .db
                .enqueue(&session_id, &envelope.message_id, text)
                .await
            {
                warn!(session_id = %session_id, error = %e, "Enqueue failed");
                return send_error(state, ctx, ErrorCode::InternalError, "enqueue failed").await;
            }
            debug!(session_id = %session_id, message_id = %envelope.message_id, "Envelope queued");
        }
        Role::Operator => {
            // The operator UI owns retrying user intent.
            debug!(session_id = %session_id, "Controller absent, envelope dropped");
        }
    }
    FrameOutcome::Continue
}

/// Transport close: clear the slot and tell the peer. The queue is left
/// alone; the operator may still drain controller traffic later.
pub async fn handle_disconnect(state: &AppState, ctx: &ConnectionCtx) {
    state.registry.unregister(&ctx.connection_id).await;

    let Some((session_id, role)) = &ctx.joined else {
        return;
    };

    let cleared = state
        .db
        .clear_session_slot(session_id, *role, &ctx.connection_id)
        .await
        .unwrap_or(false);
    if let Err(e) = state.db.delete_connection(&ctx.connection_id).await {
        warn!(connection_id = %ctx.connection_id, error = %e, "Connection row cleanup failed");
    }

    if !cleared {
        // Already evicted by a newer join; the peer was notified then.
        return;
    }

    info!(session_id = %session_id, role = %role, connection_id = %ctx.connection_id, "Disconnected");

    if let Ok(session) = state.db.get_session(session_id).await {
        if let Some(peer_conn) = session.slot_connection(role.peer()) {
            notify(
                state,
                peer_conn,
                &RelayControl::PeerDisconnected { peer_type: *role },
            )
            .await;
        }
    }
}

/// Probe an incumbent slot holder with a `ping` control frame.
///
/// Delivery failure (no live writer, or a writer whose socket died) is the
/// `Gone` signal; successful delivery counts as alive.
async fn probe_is_alive(state: &AppState, connection_id: &str) -> bool {
    let Ok(ping) = RelayControl::Ping.encode() else {
        return false;
    };
    state.registry.send_to(connection_id, ping).await
}

/// Evict an unreachable incumbent from its slot and drop its state.
async fn evict_connection(state: &AppState, session_id: &str, role: Role, connection_id: &str) {
    if let Err(e) = state
        .db
        .clear_session_slot(session_id, role, connection_id)
        .await
    {
        warn!(session_id = %session_id, error = %e, "Evicted slot clear failed");
    }
    if let Err(e) = state.db.delete_connection(connection_id).await {
        warn!(connection_id = %connection_id, error = %e, "Evicted connection cleanup failed");
    }
    state.registry.unregister(connection_id).await;
}

async fn send_queue_status(
    state: &AppState,
    ctx: &ConnectionCtx,
    session_id: &str,
) -> FrameOutcome {
    let queued = state.db.count_queued(session_id).await.unwrap_or(0);
    let oldest = state
        .db
        .oldest_queued_at(session_id)
        .await
        .unwrap_or(None)
        .map(|secs| secs * 1000);

    reply(
        state,
        ctx,
        &RelayControl::QueueStatus {
            queued_messages: queued.max(0) as u64,
            oldest_timestamp: oldest,
        },
    )
    .await
}

async fn replay_queue(state: &AppState, ctx: &ConnectionCtx, session_id: &str) -> FrameOutcome {
    let rows = match state.db.list_queue(session_id).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Queue replay failed");
            return FrameOutcome::Continue;
        }
    };

    let count = rows.len();
    for row in rows {
        if !state
            .registry
            .send_to(&ctx.connection_id, row.envelope)
            .await
        {
            return FrameOutcome::Close;
        }
    }
    if count > 0 {
        info!(session_id = %session_id, count, "Replayed queued envelopes");
    }
    FrameOutcome::Continue
}

/// Send a control frame back on this connection.
async fn reply(state: &AppState, ctx: &ConnectionCtx, frame: &RelayControl) -> FrameOutcome {
    let Ok(text) = frame.encode() else {
        return FrameOutcome::Close;
    };
    if state.registry.send_to(&ctx.connection_id, text).await {
        FrameOutcome::Continue
    } else {
        FrameOutcome::Close
    }
}

/// Send a control frame to some other connection, best effort.
async fn notify(state: &AppState, connection_id: &str, frame: &RelayControl) {
    if let Ok(text) = frame.encode() {
        state.registry.send_to(connection_id, text).await;
    }
}

async fn send_error(
    state: &AppState,
    ctx: &ConnectionCtx,
    code: ErrorCode,
    message: &str,
) -> FrameOutcome {
    let outcome = reply(
        state,
        ctx,
        &RelayControl::Error {
            code,
            message: message.to_string(),
        },
    )
    .await;
    // Protocol errors are fatal at the session level only; the connection
    // stays open unless the transport itself is gone.
    outcome
}
