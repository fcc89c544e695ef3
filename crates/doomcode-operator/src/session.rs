//! Operator session: join, pair, exchange encrypted payloads.
//!
//! One socket, one read task. Relay protocol errors are fatal for the
//! session (the UI re-pairs); crypto failures drop the offending envelope
//! and the session continues.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use doomcode_crypto::{keypair::public_key_from_bytes, Keypair, PairBox};
use doomcode_proto::{
    frame_kind, ClientControl, Envelope, FrameKind, PairingPayload, Payload, RelayControl, Role,
};

use crate::error::OperatorError;
use crate::sequencer::OutputSequencer;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Events surfaced to the operator UI layer.
#[derive(Debug)]
pub enum OperatorEvent {
    /// Join acknowledged; the relay reported this many queued envelopes.
    Connected { queued_messages: u64 },
    /// The controller came online.
    PeerConnected,
    /// The controller went away; the relay queues our peer's traffic, ours
    /// is dropped.
    PeerDisconnected,
    /// Terminal output, delivered in ascending sequence order.
    TerminalOutput { data: String, sequence: u64 },
    /// Any other decrypted payload from the controller.
    Payload(Payload),
    /// Fatal relay error; the session is over and the UI must re-pair.
    Fatal { code: String, message: String },
}

/// A live operator session.
pub struct OperatorSession {
    session_id: String,
    pair_box: Arc<PairBox>,
    sink: Arc<Mutex<WsSink>>,
}

impl OperatorSession {
    /// Consume a pairing payload: mint a keypair, join the session and
    /// precompute the pair box from the controller key in the payload.
    pub async fn connect(
        pairing: &PairingPayload,
    ) -> Result<(Self, mpsc::Receiver<OperatorEvent>), OperatorError> {
        if pairing.is_expired() {
            return Err(OperatorError::Pairing("pairing payload has expired".to_string()));
        }

        let keypair = Keypair::generate();
        let controller_key = STANDARD
            .decode(&pairing.public_key)
            .map_err(|_| OperatorError::Pairing("controller key is not base64".to_string()))?;
        let controller_public = public_key_from_bytes(&controller_key)?;
        let pair_box = Arc::new(PairBox::from_keypair(&keypair, &controller_public));

        let (stream, _) = connect_async(&pairing.relay_url)
            .await
            .map_err(|e| OperatorError::Transport(e.to_string()))?;
        info!(url = %pairing.relay_url, session_id = %pairing.session_id, "Operator link established");

        let (mut sink, read) = stream.split();

        let join = ClientControl::Join {
            session_id: pairing.session_id.clone(),
            role: Role::Operator,
            public_key: STANDARD.encode(keypair.public_bytes()),
        }
        .encode()?;
        sink.send(Message::Text(join))
            .await
            .map_err(|e| OperatorError::Transport(e.to_string()))?;

        let sink = Arc::new(Mutex::new(sink));
        let (event_tx, event_rx) = mpsc::channel(256);

        let session = Self {
            session_id: pairing.session_id.clone(),
            pair_box: Arc::clone(&pair_box),
            sink: Arc::clone(&sink),
        };

        tokio::spawn(read_loop(
            read,
            pairing.session_id.clone(),
            pair_box,
            sink,
            event_tx,
        ));

        Ok((session, event_rx))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Seal and send a payload to the controller.
    pub async fn send(&self, payload: Payload) -> Result<(), OperatorError> {
        let sealed = self.pair_box.seal(&payload.to_bytes()?)?;
        let envelope = Envelope::new(
            &self.session_id,
            Role::Operator,
            &sealed.nonce,
            &sealed.ciphertext,
        );
        self.send_text(envelope.encode()?).await
    }

    /// Ask the relay how much is queued for us.
    pub async fn query_queue_status(&self) -> Result<(), OperatorError> {
        let frame = ClientControl::QueueStatus {
            session_id: self.session_id.clone(),
        }
        .encode()?;
        self.send_text(frame).await
    }

    /// Leave the session and close the socket.
    pub async fn leave(&self) -> Result<(), OperatorError> {
        self.send_text(ClientControl::Leave.encode()?).await?;
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), OperatorError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| OperatorError::Transport(e.to_string()))
    }
}

async fn read_loop(
    mut read: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    session_id: String,
    pair_box: Arc<PairBox>,
    sink: Arc<Mutex<WsSink>>,
    event_tx: mpsc::Sender<OperatorEvent>,
) {
    let mut sequencer = OutputSequencer::new();

    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Operator socket error");
                break;
            }
        };

        match frame_kind(&text) {
            FrameKind::Control => {
                let control = match RelayControl::decode(&text) {
                    Ok(control) => control,
                    Err(e) => {
                        debug!(error = %e, "Dropping malformed control frame");
                        continue;
                    }
                };
                let stop = handle_control(control, &event_tx).await;
                if stop {
                    break;
                }
            }
            FrameKind::Envelope => {
                handle_envelope(
                    &text,
                    &session_id,
                    &pair_box,
                    &sink,
                    &event_tx,
                    &mut sequencer,
                )
                .await;
            }
            FrameKind::Unknown => debug!("Dropping unrecognized frame"),
        }
    }

    debug!("Operator read loop finished");
}

/// Returns `true` when the session is over.
async fn handle_control(control: RelayControl, event_tx: &mpsc::Sender<OperatorEvent>) -> bool {
    match control {
        RelayControl::SessionJoined { .. } => false,
        RelayControl::QueueStatus {
            queued_messages, ..
        } => {
            let _ = event_tx
                .send(OperatorEvent::Connected { queued_messages })
                .await;
            false
        }
        RelayControl::PeerConnected { .. } => {
            let _ = event_tx.send(OperatorEvent::PeerConnected).await;
            false
        }
        RelayControl::PeerDisconnected { .. } => {
            let _ = event_tx.send(OperatorEvent::PeerDisconnected).await;
            false
        }
        RelayControl::Error { code, message } => {
            let _ = event_tx
                .send(OperatorEvent::Fatal {
                    code: format!("{code:?}"),
                    message,
                })
                .await;
            true
        }
        RelayControl::Ping | RelayControl::SessionCreated { .. } => false,
    }
}

async fn handle_envelope(
    text: &str,
    session_id: &str,
    pair_box: &PairBox,
    sink: &Arc<Mutex<WsSink>>,
    event_tx: &mpsc::Sender<OperatorEvent>,
    sequencer: &mut OutputSequencer,
) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "Dropping invalid envelope");
            return;
        }
    };
    if envelope.session_id != session_id {
        debug!("Dropping envelope for a different session");
        return;
    }

    let plaintext = match (envelope.nonce_bytes(), envelope.ciphertext_bytes()) {
        (Ok(nonce), Ok(ciphertext)) => match pair_box.open(&nonce, &ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                // Stale ciphertext sealed to an old key; drop and move on.
                warn!(message_id = %envelope.message_id, error = %e, "Envelope failed to open");
                return;
            }
        },
        _ => return,
    };

    // Every delivered envelope advances the ack cursor, draining the relay
    // queue as we go. An id the queue never held is a no-op there.
    let ack = ClientControl::Ack {
        session_id: session_id.to_string(),
        last_message_id: envelope.message_id.clone(),
    };
    if let Ok(frame) = ack.encode() {
        let mut sink = sink.lock().await;
        let _ = sink.send(Message::Text(frame)).await;
    }

    match Payload::from_bytes(&plaintext) {
        Ok(Payload::TerminalOutput { data, sequence, .. }) => {
            let base = sequencer.next_sequence();
            for (offset, chunk) in sequencer.push(sequence, data).into_iter().enumerate() {
                let _ = event_tx
                    .send(OperatorEvent::TerminalOutput {
                        data: chunk,
                        sequence: base + offset as u64,
                    })
                    .await;
            }
        }
        Ok(payload) => {
            let _ = event_tx.send(OperatorEvent::Payload(payload)).await;
        }
        Err(e) => {
            warn!(error = %e, "Decrypted payload is malformed");
        }
    }
}
