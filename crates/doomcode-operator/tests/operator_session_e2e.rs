//! Operator client against a live relay and a controller endpoint.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use doomcode_crypto::{keypair::public_key_from_bytes, Keypair, PairBox};
use doomcode_operator::{OperatorEvent, OperatorSession};
use doomcode_proto::{
    frame_kind, ClientControl, Envelope, FrameKind, PairingPayload, Payload, PermissionDecision,
    RelayControl, Role,
};
use doomcode_relay::registry::ConnectionRegistry;
use doomcode_relay::server::{build_router, AppState};
use doomcode_relay::storage::RelayDatabase;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_relay() -> SocketAddr {
    let state = AppState {
        db: RelayDatabase::open_in_memory().await.unwrap(),
        registry: ConnectionRegistry::new(),
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

/// A minimal controller endpoint: create the session, then seal and route
/// payloads by hand.
struct FakeController {
    ws: WsStream,
    keypair: Keypair,
    session_id: String,
}

impl FakeController {
    async fn start(addr: SocketAddr) -> Self {
        let keypair = Keypair::generate();
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        ws.send(Message::Text(
            ClientControl::Create {
                public_key: STANDARD.encode(keypair.public_bytes()),
            }
            .encode()
            .unwrap(),
        ))
        .await
        .unwrap();

        let session_id = match recv_control(&mut ws).await {
            RelayControl::SessionCreated { session_id } => session_id,
            other => panic!("unexpected: {other:?}"),
        };
        Self {
            ws,
            keypair,
            session_id,
        }
    }

    fn pairing(&self, addr: SocketAddr) -> PairingPayload {
        PairingPayload::new(
            &self.session_id,
            &STANDARD.encode(self.keypair.public_bytes()),
            &format!("ws://{addr}/ws"),
        )
    }

    /// Wait for the operator to join and build the pair box from its key.
    async fn await_pairing(&mut self) -> PairBox {
        loop {
            match recv_control(&mut self.ws).await {
                RelayControl::PeerConnected {
                    peer_public_key, ..
                } => {
                    let bytes = STANDARD.decode(peer_public_key).unwrap();
                    let public = public_key_from_bytes(&bytes).unwrap();
                    return PairBox::from_keypair(&self.keypair, &public);
                }
                _ => continue,
            }
        }
    }

    async fn send_payload(&mut self, pair_box: &PairBox, payload: &Payload) {
        let sealed = pair_box.seal(&payload.to_bytes().unwrap()).unwrap();
        let envelope = Envelope::new(
            &self.session_id,
            Role::Controller,
            &sealed.nonce,
            &sealed.ciphertext,
        );
        self.ws
            .send(Message::Text(envelope.encode().unwrap()))
            .await
            .unwrap();
    }

    async fn recv_payload(&mut self, pair_box: &PairBox) -> Payload {
        loop {
            let text = recv_text(&mut self.ws).await;
            if frame_kind(&text) != FrameKind::Envelope {
                continue;
            }
            let envelope = Envelope::decode(&text).unwrap();
            let plaintext = pair_box
                .open(
                    &envelope.nonce_bytes().unwrap(),
                    &envelope.ciphertext_bytes().unwrap(),
                )
                .unwrap();
            return Payload::from_bytes(&plaintext).unwrap();
        }
    }
}

async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        match msg {
            Message::Text(text) => return text,
            _ => continue,
        }
    }
}

async fn recv_control(ws: &mut WsStream) -> RelayControl {
    loop {
        let text = recv_text(ws).await;
        if frame_kind(&text) == FrameKind::Control {
            return RelayControl::decode(&text).unwrap();
        }
    }
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<OperatorEvent>) -> OperatorEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

#[tokio::test]
async fn operator_pairs_and_exchanges_payloads() {
    let addr = spawn_relay().await;
    let mut controller = FakeController::start(addr).await;
    let pairing = controller.pairing(addr);

    let (session, mut events) = OperatorSession::connect(&pairing).await.unwrap();
    let pair_box = controller.await_pairing().await;

    match next_event(&mut events).await {
        OperatorEvent::Connected { queued_messages } => assert_eq!(queued_messages, 0),
        other => panic!("unexpected: {other:?}"),
    }

    // Controller → operator: terminal output arrives in sequence order.
    for (n, text) in ["one", "two", "three"].iter().enumerate() {
        controller
            .send_payload(
                &pair_box,
                &Payload::TerminalOutput {
                    stream: "stdout".into(),
                    data: (*text).to_string(),
                    sequence: n as u64,
                },
            )
            .await;
    }
    for (n, expected) in ["one", "two", "three"].iter().enumerate() {
        match next_event(&mut events).await {
            OperatorEvent::TerminalOutput { data, sequence } => {
                assert_eq!(&data, expected);
                assert_eq!(sequence, n as u64);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    // Operator → controller: a prompt and a permission decision.
    session
        .send(Payload::UserPrompt {
            prompt: "fix the bug".into(),
            context: None,
        })
        .await
        .unwrap();
    match controller.recv_payload(&pair_box).await {
        Payload::UserPrompt { prompt, .. } => assert_eq!(prompt, "fix the bug"),
        other => panic!("unexpected: {other:?}"),
    }

    session
        .send(Payload::PermissionResponse {
            request_id: "req-1".into(),
            decision: PermissionDecision::Approve,
        })
        .await
        .unwrap();
    match controller.recv_payload(&pair_box).await {
        Payload::PermissionResponse { decision, .. } => {
            assert!(decision.is_approval());
        }
        other => panic!("unexpected: {other:?}"),
    }

    session.leave().await.unwrap();
}

#[tokio::test]
async fn rotated_operator_key_sees_an_empty_queue() {
    let addr = spawn_relay().await;
    let mut controller = FakeController::start(addr).await;
    let pairing = controller.pairing(addr);

    // An operator pairs and leaves; the controller queues output while it
    // is away.
    let (session, mut events) = OperatorSession::connect(&pairing).await.unwrap();
    let pair_box = controller.await_pairing().await;
    match next_event(&mut events).await {
        OperatorEvent::Connected { .. } => {}
        other => panic!("unexpected: {other:?}"),
    }
    session.leave().await.unwrap();

    // Wait until the relay has processed the disconnect.
    loop {
        match recv_control(&mut controller.ws).await {
            RelayControl::PeerDisconnected { .. } => break,
            _ => continue,
        }
    }

    for n in 0..3u64 {
        controller
            .send_payload(
                &pair_box,
                &Payload::TerminalOutput {
                    stream: "stdout".into(),
                    data: format!("queued {n}"),
                    sequence: n,
                },
            )
            .await;
    }

    // Each `connect` mints a fresh keypair, so the rejoin is a key
    // rotation: the stale ciphertexts must be purged before replay.
    let (_session2, mut events2) = OperatorSession::connect(&pairing).await.unwrap();
    match next_event(&mut events2).await {
        OperatorEvent::Connected { queued_messages } => assert_eq!(queued_messages, 0),
        other => panic!("unexpected: {other:?}"),
    }
}
