//! End-to-end relay tests over real sockets.
//!
//! These drive the relay the way the endpoints do: HTTP bootstrap, then a
//! websocket per party, with real key pairs sealing real payloads.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use doomcode_crypto::{Keypair, PairBox};
use doomcode_proto::{ClientControl, Envelope, Payload, RelayControl, Role};
use doomcode_relay::registry::ConnectionRegistry;
use doomcode_relay::server::{build_router, AppState};
use doomcode_relay::storage::RelayDatabase;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_relay() -> (SocketAddr, AppState) {
    let state = AppState {
        db: RelayDatabase::open_in_memory().await.unwrap(),
        registry: ConnectionRegistry::new(),
    };
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (addr, state)
}

async fn connect_ws(addr: SocketAddr) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    stream
}

async fn send_text(ws: &mut WsStream, text: String) {
    ws.send(Message::Text(text)).await.unwrap();
}

async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_control(ws: &mut WsStream) -> RelayControl {
    RelayControl::decode(&recv_text(ws).await).unwrap()
}

/// Create a session over the socket as the controller; returns the id.
async fn create_session(ws: &mut WsStream, public_key: &str) -> String {
    send_text(
        ws,
        ClientControl::Create {
            public_key: public_key.into(),
        }
        .encode()
        .unwrap(),
    )
    .await;
    match recv_control(ws).await {
        RelayControl::SessionCreated { session_id } => session_id,
        other => panic!("unexpected: {other:?}"),
    }
}

async fn join_session(ws: &mut WsStream, session_id: &str, role: Role, public_key: &str) {
    send_text(
        ws,
        ClientControl::Join {
            session_id: session_id.into(),
            role,
            public_key: public_key.into(),
        }
        .encode()
        .unwrap(),
    )
    .await;
}

fn key_b64(keypair: &Keypair) -> String {
    STANDARD.encode(keypair.public_bytes())
}

#[tokio::test]
async fn http_bootstrap_endpoints() {
    let state = AppState {
        db: RelayDatabase::open_in_memory().await.unwrap(),
        registry: ConnectionRegistry::new(),
    };
    let router = build_router(state);

    // POST /session mints a session id.
    let response = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/session")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    // GET /session/:id reports slot occupancy.
    let response = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/session/{session_id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["sessionId"], session_id.as_str());
    assert_eq!(body["hasController"], false);
    assert_eq!(body["hasOperator"], false);
    assert!(body["expiresAt"].as_i64().unwrap() > body["createdAt"].as_i64().unwrap());

    // Unknown session is a 404.
    let response = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/session/not-a-session")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Health always answers.
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn pair_and_echo_encrypted() {
    let (addr, _state) = spawn_relay().await;

    let controller_keys = Keypair::generate();
    let operator_keys = Keypair::generate();

    let mut controller = connect_ws(addr).await;
    let session_id = create_session(&mut controller, &key_b64(&controller_keys)).await;

    let mut operator = connect_ws(addr).await;
    join_session(&mut operator, &session_id, Role::Operator, &key_b64(&operator_keys)).await;

    // Operator learns the controller key from the join reply.
    let controller_key_b64 = match recv_control(&mut operator).await {
        RelayControl::SessionJoined { peer_public_key } => peer_public_key.unwrap(),
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(controller_key_b64, key_b64(&controller_keys));
    match recv_control(&mut operator).await {
        RelayControl::QueueStatus { queued_messages, .. } => assert_eq!(queued_messages, 0),
        other => panic!("unexpected: {other:?}"),
    }

    // Controller learns the operator key from the peer notification.
    let operator_key_b64 = match recv_control(&mut controller).await {
        RelayControl::PeerConnected { peer_public_key, peer_type } => {
            assert_eq!(peer_type, Role::Operator);
            peer_public_key
        }
        other => panic!("unexpected: {other:?}"),
    };

    // Both sides precompute their pair boxes and the controller echoes.
    let operator_public =
        doomcode_crypto::keypair::public_key_from_bytes(&STANDARD.decode(operator_key_b64).unwrap())
            .unwrap();
    let controller_public = doomcode_crypto::keypair::public_key_from_bytes(
        &STANDARD.decode(controller_key_b64).unwrap(),
    )
    .unwrap();
    let controller_box = PairBox::from_keypair(&controller_keys, &operator_public);
    let operator_box = PairBox::from_keypair(&operator_keys, &controller_public);

    let payload = Payload::TerminalOutput {
        stream: "stdout".into(),
        data: "ok\n".into(),
        sequence: 0,
    };
    let sealed = controller_box.seal(&payload.to_bytes().unwrap()).unwrap();
    let envelope = Envelope::new(&session_id, Role::Controller, &sealed.nonce, &sealed.ciphertext);
    send_text(&mut controller, envelope.encode().unwrap()).await;

    // One envelope arrives and decrypts to the exact payload.
    let received = Envelope::decode(&recv_text(&mut operator).await).unwrap();
    assert_eq!(received.sender, Role::Controller);
    let plaintext = operator_box
        .open(
            &received.nonce_bytes().unwrap(),
            &received.ciphertext_bytes().unwrap(),
        )
        .unwrap();
    assert_eq!(Payload::from_bytes(&plaintext).unwrap(), payload);
}

#[tokio::test]
async fn offline_queue_drains_in_order_and_acks() {
    let (addr, state) = spawn_relay().await;

    let controller_keys = Keypair::generate();
    let mut controller = connect_ws(addr).await;
    let session_id = create_session(&mut controller, &key_b64(&controller_keys)).await;

    // Three envelopes before any operator exists.
    let mut message_ids = Vec::new();
    for n in 0..3u8 {
        let envelope = Envelope::new(&session_id, Role::Controller, &[n; 24], b"ciphertext");
        message_ids.push(envelope.message_id.clone());
        send_text(&mut controller, envelope.encode().unwrap()).await;
    }

    let operator_keys = Keypair::generate();
    let mut operator = connect_ws(addr).await;
    join_session(&mut operator, &session_id, Role::Operator, &key_b64(&operator_keys)).await;

    match recv_control(&mut operator).await {
        RelayControl::SessionJoined { .. } => {}
        other => panic!("unexpected: {other:?}"),
    }
    match recv_control(&mut operator).await {
        RelayControl::QueueStatus { queued_messages, oldest_timestamp } => {
            assert_eq!(queued_messages, 3);
            assert!(oldest_timestamp.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }
    for expected in &message_ids {
        let envelope = Envelope::decode(&recv_text(&mut operator).await).unwrap();
        assert_eq!(&envelope.message_id, expected);
    }

    // Ack by the last replayed id empties the queue.
    send_text(
        &mut operator,
        ClientControl::Ack {
            session_id: session_id.clone(),
            last_message_id: message_ids[2].clone(),
        }
        .encode()
        .unwrap(),
    )
    .await;

    // Poll through the same socket so the ack has landed before we assert.
    send_text(
        &mut operator,
        ClientControl::QueueStatus {
            session_id: session_id.clone(),
        }
        .encode()
        .unwrap(),
    )
    .await;
    match recv_control(&mut operator).await {
        RelayControl::QueueStatus { queued_messages, .. } => assert_eq!(queued_messages, 0),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(state.db.count_queued(&session_id).await.unwrap(), 0);
}

#[tokio::test]
async fn rotated_operator_key_purges_queue() {
    let (addr, state) = spawn_relay().await;

    let controller_keys = Keypair::generate();
    let mut controller = connect_ws(addr).await;
    let session_id = create_session(&mut controller, &key_b64(&controller_keys)).await;

    // First operator pairs, then drops.
    let old_keys = Keypair::generate();
    {
        let mut operator = connect_ws(addr).await;
        join_session(&mut operator, &session_id, Role::Operator, &key_b64(&old_keys)).await;
        recv_control(&mut operator).await;
        recv_control(&mut operator).await;
        operator.close(None).await.unwrap();
    }
    // Consume the controller's peer notifications.
    match recv_control(&mut controller).await {
        RelayControl::PeerConnected { .. } => {}
        other => panic!("unexpected: {other:?}"),
    }
    match recv_control(&mut controller).await {
        RelayControl::PeerDisconnected { .. } => {}
        other => panic!("unexpected: {other:?}"),
    }

    // Controller queues traffic sealed to the old key.
    for n in 0..2u8 {
        let envelope = Envelope::new(&session_id, Role::Controller, &[n; 24], b"stale");
        send_text(&mut controller, envelope.encode().unwrap()).await;
    }

    // A rotated operator joins: nothing stale may surface.
    let new_keys = Keypair::generate();
    let mut operator = connect_ws(addr).await;
    join_session(&mut operator, &session_id, Role::Operator, &key_b64(&new_keys)).await;

    match recv_control(&mut operator).await {
        RelayControl::SessionJoined { .. } => {}
        other => panic!("unexpected: {other:?}"),
    }
    match recv_control(&mut operator).await {
        RelayControl::QueueStatus { queued_messages, .. } => assert_eq!(queued_messages, 0),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(state.db.count_queued(&session_id).await.unwrap(), 0);
}

#[tokio::test]
async fn dead_incumbent_is_replaced_over_socket() {
    let (addr, _state) = spawn_relay().await;

    let controller_keys = Keypair::generate();
    let mut controller = connect_ws(addr).await;
    let session_id = create_session(&mut controller, &key_b64(&controller_keys)).await;

    let operator_keys = Keypair::generate();
    let mut operator = connect_ws(addr).await;
    join_session(&mut operator, &session_id, Role::Operator, &key_b64(&operator_keys)).await;
    recv_control(&mut operator).await; // session_joined
    recv_control(&mut operator).await; // queue_status
    recv_control(&mut controller).await; // peer_connected

    // The incumbent controller's transport dies without a close frame.
    drop(controller);
    // Give the relay a moment to notice the closed socket.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let fresh_keys = Keypair::generate();
    let mut fresh = connect_ws(addr).await;
    join_session(&mut fresh, &session_id, Role::Controller, &key_b64(&fresh_keys)).await;

    match recv_control(&mut fresh).await {
        RelayControl::SessionJoined { peer_public_key } => {
            assert_eq!(peer_public_key.unwrap(), key_b64(&operator_keys));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // The operator sees the churn and then exactly one fresh peer_connected.
    loop {
        match recv_control(&mut operator).await {
            RelayControl::PeerDisconnected { .. } => continue,
            RelayControl::PeerConnected { peer_public_key, peer_type } => {
                assert_eq!(peer_type, Role::Controller);
                assert_eq!(peer_public_key, key_b64(&fresh_keys));
                break;
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
