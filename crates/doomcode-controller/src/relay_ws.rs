//! Duplex link to the relay.
//!
//! Maintains the websocket with automatic reconnection and exponential
//! backoff. On every (re)connect the hello frame (the session join) is
//! sent first, so the relay always sees a control frame before anything
//! else.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ControllerError;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
const OUTBOUND_BUFFER: usize = 128;
const INBOUND_BUFFER: usize = 256;

/// Handle for sending frames to the relay.
#[derive(Clone)]
pub struct RelayLink {
    outbound_tx: mpsc::Sender<String>,
}

impl RelayLink {
    /// Connect and send the hello frame; returns the link and the inbound
    /// frame stream. The stream closes for good once reconnection gives up.
    pub async fn connect(
        ws_url: &str,
        hello_frame: String,
    ) -> Result<(Self, mpsc::Receiver<String>), ControllerError> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| ControllerError::Transport(e.to_string()))?;
        info!(url = %ws_url, "Relay link established");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

        tokio::spawn(run_link(
            ws_url.to_string(),
            hello_frame,
            stream,
            outbound_rx,
            inbound_tx,
        ));

        Ok((Self { outbound_tx }, inbound_rx))
    }

    /// Queue a frame for the relay.
    pub async fn send(&self, frame: String) -> Result<(), ControllerError> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| ControllerError::Transport("relay link closed".to_string()))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_link(
    url: String,
    hello_frame: String,
    first_stream: WsStream,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<String>,
) {
    let mut current = Some(first_stream);
    let mut attempt: u32 = 0;

    'outer: loop {
        let stream = match current.take() {
            Some(stream) => stream,
            None => {
                if attempt >= MAX_RECONNECT_ATTEMPTS {
                    warn!("Relay reconnect attempts exhausted");
                    break 'outer;
                }
                attempt += 1;
                let delay = reconnect_delay_ms(attempt);
                warn!(attempt, delay_ms = delay, "Reconnecting to relay");
                sleep(Duration::from_millis(delay)).await;

                match connect_async(&url).await {
                    Ok((stream, _)) => {
                        info!(url = %url, "Relay link re-established");
                        stream
                    }
                    Err(e) => {
                        warn!(error = %e, "Relay reconnect failed");
                        continue;
                    }
                }
            }
        };

        let (mut write, mut read) = stream.split();
        if write.send(Message::Text(hello_frame.clone())).await.is_err() {
            continue;
        }
        attempt = 0;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(text).await.is_err() {
                                // The runtime went away; shut the link down.
                                break 'outer;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Relay socket closed");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Relay socket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if write.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break 'outer;
                        }
                    }
                }
            }
        }
    }
}

fn reconnect_delay_ms(attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1);
    let delay = 1_000u64.saturating_mul(2u64.saturating_pow(exp));
    delay.min(MAX_RECONNECT_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(reconnect_delay_ms(1), 1_000);
        assert_eq!(reconnect_delay_ms(2), 2_000);
        assert_eq!(reconnect_delay_ms(3), 4_000);
        assert_eq!(reconnect_delay_ms(6), 32_000.min(MAX_RECONNECT_DELAY_MS));
        assert_eq!(reconnect_delay_ms(20), MAX_RECONNECT_DELAY_MS);
    }
}
