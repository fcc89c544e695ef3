//! Controller session runtime.
//!
//! Wires everything together: session bootstrap against the relay HTTP
//! endpoint, the duplex link, the pair box once the operator's key is
//! known, the agent supervisor, and the patch tracker. One select loop owns
//! the session; PTY reads, transport reads and pacing timers all run in
//! their own tasks and never block each other.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use doomcode_crypto::{keypair::public_key_from_bytes, Keypair, PairBox};
use doomcode_proto::{
    frame_kind, AgentCommand, ClientControl, Envelope, FrameKind, PairingPayload,
    PatchDecisionKind, Payload, RelayControl, Role,
};

use crate::agent::{AgentSupervisor, SupervisorEvent};
use crate::config::ControllerConfig;
use crate::diff::parse_diff;
use crate::error::ControllerError;
use crate::pairing::render_pairing;
use crate::patch::PatchTracker;
use crate::relay_ws::RelayLink;
use crate::scan::estimate_risk;
use crate::session_cache::SessionCache;

/// Heartbeat cadence on the encrypted channel.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Grace between approving a patch and reading post-apply hashes.
const PATCH_FINALIZE_DELAY: Duration = Duration::from_secs(1);

/// How the session id is obtained at startup.
#[derive(Debug, Clone)]
pub enum SessionBootstrap {
    /// `start`: create a session (or reuse the cached one).
    Start { reuse: bool },
    /// `connect <sessionId>`: join an existing session as the controller.
    Connect { session_id: String },
}

/// Run the controller until the session ends or a fatal error occurs.
pub async fn run(config: ControllerConfig, bootstrap: SessionBootstrap) -> Result<(), ControllerError> {
    let cache = SessionCache::load(&config.working_dir)?;

    let (session_id, keypair) = match &bootstrap {
        SessionBootstrap::Connect { session_id } => match cache {
            // Rejoining the cached session keeps its keypair so queued
            // envelopes stay readable.
            Some(cache) if cache.session_id == *session_id => {
                (session_id.clone(), cache.keypair()?)
            }
            _ => (session_id.clone(), Keypair::generate()),
        },
        SessionBootstrap::Start { reuse: true } => match cache {
            Some(cache) => {
                info!(session_id = %cache.session_id, "Reusing cached session");
                let keypair = cache.keypair()?;
                (cache.session_id, keypair)
            }
            None => {
                warn!("No cached session to reuse, creating a new one");
                (create_session(&config).await?, Keypair::generate())
            }
        },
        SessionBootstrap::Start { reuse: false } => {
            (create_session(&config).await?, Keypair::generate())
        }
    };

    SessionCache::new(&session_id, &config.ws_url, &config.http_url, &keypair)
        .save(&config.working_dir)?;

    let public_key_b64 = STANDARD.encode(keypair.public_bytes());
    let pairing = PairingPayload::new(&session_id, &public_key_b64, &config.ws_url);
    println!("{}", render_pairing(&pairing)?);

    let hello = ClientControl::Join {
        session_id: session_id.clone(),
        role: Role::Controller,
        public_key: public_key_b64,
    }
    .encode()?;
    let (link, inbound_rx) = RelayLink::connect(&config.ws_url, hello).await?;

    let (event_tx, event_rx) = mpsc::channel(256);
    let supervisor = AgentSupervisor::new(config.clone(), event_tx);
    let tracker = Arc::new(PatchTracker::new(&config.working_dir));

    let mut session = SessionLoop::new(config, session_id, keypair, link, supervisor, tracker);
    session.run(inbound_rx, event_rx).await
}

/// `POST /session` against the relay bootstrap endpoint.
async fn create_session(config: &ControllerConfig) -> Result<String, ControllerError> {
    let url = format!("{}/session", config.http_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .send()
        .await
        .map_err(|e| ControllerError::RelayHttp(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ControllerError::RelayHttp(format!(
            "session create returned {}",
            response.status()
        )));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ControllerError::RelayHttp(e.to_string()))?;
    body["sessionId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ControllerError::RelayHttp("sessionId missing from response".to_string()))
}

struct SessionLoop {
    config: ControllerConfig,
    session_id: String,
    keypair: Keypair,
    pair_box: Option<Arc<PairBox>>,
    link: RelayLink,
    supervisor: Arc<AgentSupervisor>,
    tracker: Arc<PatchTracker>,
    /// Payloads produced before the operator key is known.
    backlog: Vec<Payload>,
    /// Side channel for payloads produced by spawned tasks (undo, patch
    /// finalize).
    deferred_tx: mpsc::Sender<Payload>,
    deferred_rx: Option<mpsc::Receiver<Payload>>,
}

impl SessionLoop {
    fn new(
        config: ControllerConfig,
        session_id: String,
        keypair: Keypair,
        link: RelayLink,
        supervisor: Arc<AgentSupervisor>,
        tracker: Arc<PatchTracker>,
    ) -> Self {
        let (deferred_tx, deferred_rx) = mpsc::channel(64);
        Self {
            config,
            session_id,
            keypair,
            pair_box: None,
            link,
            supervisor,
            tracker,
            backlog: Vec::new(),
            deferred_tx,
            deferred_rx: Some(deferred_rx),
        }
    }

    async fn run(
        &mut self,
        mut inbound_rx: mpsc::Receiver<String>,
        mut event_rx: mpsc::Receiver<SupervisorEvent>,
    ) -> Result<(), ControllerError> {
        let mut deferred_rx = self.deferred_rx.take().unwrap_or_else(|| {
            let (_, rx) = mpsc::channel(1);
            rx
        });
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                frame = inbound_rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_frame(&frame).await?,
                        None => {
                            warn!("Relay link closed for good");
                            break;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_supervisor_event(event).await;
                }
                Some(payload) = deferred_rx.recv() => {
                    self.send_payload(payload).await;
                }
                _ = heartbeat.tick() => {
                    if self.pair_box.is_some() {
                        self.send_payload(Payload::Heartbeat {
                            timestamp: doomcode_core::unix_timestamp_ms(),
                            agent_status: self.supervisor.status(),
                        })
                        .await;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    self.supervisor.stop().await;
                    let _ = self.link.send(ClientControl::Leave.encode()?).await;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: &str) -> Result<(), ControllerError> {
        match frame_kind(frame) {
            FrameKind::Control => match RelayControl::decode(frame) {
                Ok(control) => self.handle_control(control).await,
                Err(e) => {
                    debug!(error = %e, "Dropping malformed control frame");
                    Ok(())
                }
            },
            FrameKind::Envelope => {
                self.handle_envelope(frame).await;
                Ok(())
            }
            FrameKind::Unknown => {
                debug!("Dropping unrecognized frame");
                Ok(())
            }
        }
    }

    async fn handle_control(&mut self, control: RelayControl) -> Result<(), ControllerError> {
        match control {
            RelayControl::SessionJoined { peer_public_key } => {
                info!(session_id = %self.session_id, "Joined session as controller");
                if let Some(key) = peer_public_key {
                    self.pair_with(&key).await?;
                }
                Ok(())
            }
            RelayControl::PeerConnected {
                peer_public_key, ..
            } => {
                info!("Operator connected");
                self.pair_with(&peer_public_key).await
            }
            RelayControl::PeerDisconnected { .. } => {
                info!("Operator disconnected; output will queue at the relay");
                Ok(())
            }
            RelayControl::QueueStatus {
                queued_messages, ..
            } => {
                debug!(queued_messages, "Queue status");
                Ok(())
            }
            RelayControl::Error { code, message } => {
                let code_text = format!("{code:?}");
                warn!(code = %code_text, message = %message, "Relay error");
                Err(ControllerError::RelayProtocol {
                    code: code_text,
                    message,
                })
            }
            RelayControl::Ping | RelayControl::SessionCreated { .. } => Ok(()),
        }
    }

    /// Precompute the shared secret, start the agent, flush pre-pairing
    /// output and send a resync snapshot.
    async fn pair_with(&mut self, peer_public_key_b64: &str) -> Result<(), ControllerError> {
        let key_bytes = STANDARD
            .decode(peer_public_key_b64)
            .map_err(|_| ControllerError::Transport("peer public key is not base64".to_string()))?;
        let peer_public = public_key_from_bytes(&key_bytes)?;
        self.pair_box = Some(Arc::new(PairBox::from_keypair(&self.keypair, &peer_public)));
        debug!(peer = %doomcode_crypto::fingerprint_of(&{
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&key_bytes);
            arr
        }), "Pair box ready");

        if !self.supervisor.is_running() {
            if let Err(e) = self.supervisor.start(None).await {
                warn!(error = %e, "Agent start failed");
                self.send_payload(Payload::TerminalOutput {
                    stream: "stdout".to_string(),
                    data: format!("assistant failed to start: {e}\r\n"),
                    sequence: self.supervisor.last_sequence(),
                })
                .await;
            }
        }

        for payload in std::mem::take(&mut self.backlog) {
            self.send_payload(payload).await;
        }

        let snapshot = self.session_snapshot();
        self.send_payload(snapshot).await;
        Ok(())
    }

    fn session_snapshot(&self) -> Payload {
        Payload::SessionState {
            agent_id: self.supervisor.agent_id(),
            agent_status: self.supervisor.status(),
            last_sequence: self.supervisor.last_sequence(),
            pending_permission_ids: self.supervisor.pending_permission_ids(),
            tracked_patch_ids: self.tracker.tracked_ids(),
        }
    }

    async fn handle_envelope(&mut self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Dropping invalid envelope");
                return;
            }
        };
        if envelope.session_id != self.session_id {
            debug!("Dropping envelope for a different session");
            return;
        }

        let Some(pair_box) = self.pair_box.clone() else {
            warn!("Envelope before pairing, dropping");
            return;
        };

        let plaintext = match (envelope.nonce_bytes(), envelope.ciphertext_bytes()) {
            (Ok(nonce), Ok(ciphertext)) => match pair_box.open(&nonce, &ciphertext) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    // Expected after a key rotation purge race; the session
                    // continues.
                    warn!(message_id = %envelope.message_id, error = %e, "Envelope failed to open");
                    return;
                }
            },
            _ => return,
        };

        let payload = match Payload::from_bytes(&plaintext) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Decrypted payload is malformed");
                return;
            }
        };
        self.handle_payload(payload).await;
    }

    async fn handle_payload(&mut self, payload: Payload) {
        match payload {
            Payload::UserPrompt { prompt, .. } => {
                if !self.supervisor.is_running() {
                    if let Err(e) = self.supervisor.start(None).await {
                        self.send_terminal_error(&format!("assistant failed to start: {e}"))
                            .await;
                        return;
                    }
                }
                if let Err(e) = self.supervisor.send_prompt(&prompt).await {
                    self.send_terminal_error(&format!("prompt injection failed: {e}"))
                        .await;
                }
            }
            Payload::PermissionResponse {
                request_id,
                decision,
            } => {
                if let Err(e) = self.supervisor.resolve_permission(&request_id, decision).await {
                    warn!(request_id, error = %e, "Permission answer failed");
                }
            }
            Payload::PatchDecision {
                patch_id,
                decision,
                edited_diff,
            } => self.handle_patch_decision(&patch_id, decision, edited_diff).await,
            Payload::UndoRequest { patch_id } => self.handle_undo(&patch_id),
            Payload::AgentControl {
                command,
                agent_id,
                config,
            } => self.handle_agent_control(command, &agent_id, config).await,
            Payload::Heartbeat { timestamp, .. } => {
                debug!(timestamp, "Operator heartbeat");
            }
            other => {
                debug!(?other, "Ignoring payload kind not addressed to the controller");
            }
        }
    }

    async fn handle_patch_decision(
        &mut self,
        patch_id: &str,
        decision: PatchDecisionKind,
        edited_diff: Option<String>,
    ) {
        match decision {
            PatchDecisionKind::Apply => {
                if let Err(e) = self.supervisor.answer_patch_decision(true).await {
                    self.send_terminal_error(&format!("patch approval failed: {e}")).await;
                    return;
                }
                // The agent writes the files; read the post-apply hashes
                // once it has had the chance.
                let tracker = Arc::clone(&self.tracker);
                let deferred = self.deferred_tx.clone();
                let patch_id = patch_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(PATCH_FINALIZE_DELAY).await;
                    if let Some(info) = tracker.finalize(&patch_id) {
                        let _ = deferred.send(Payload::PatchApplied { patch: info }).await;
                    }
                });
            }
            PatchDecisionKind::Reject => {
                if let Err(e) = self.supervisor.answer_patch_decision(false).await {
                    warn!(error = %e, "Patch rejection answer failed");
                }
                self.tracker.discard(patch_id);
            }
            PatchDecisionKind::Edit => {
                let Some(diff_text) = edited_diff else {
                    warn!(patch_id, "Edit decision without an edited diff");
                    return;
                };
                self.apply_edited_diff(patch_id, &diff_text).await;
            }
        }
    }

    /// The operator edited the diff: the controller applies it directly
    /// instead of approving the agent's version.
    async fn apply_edited_diff(&mut self, patch_id: &str, diff_text: &str) {
        let diff = parse_diff(diff_text);
        if diff.is_empty() {
            self.send_terminal_error("edited diff contains no files").await;
            return;
        }

        // Re-track against the edited content, then write it out.
        self.tracker.discard(patch_id);
        self.tracker.prepare(
            patch_id,
            &self.supervisor.agent_id(),
            &self.supervisor.last_prompt().unwrap_or_default(),
            &diff,
        );

        let root = self.config.working_dir.clone();
        let apply_result = tokio::task::spawn_blocking(move || {
            crate::patch::apply_diff_to_tree(&root, &diff)
        })
        .await;

        match apply_result {
            Ok(Ok(files)) => {
                info!(patch_id, files = files.len(), "Edited diff applied");
                if let Some(info) = self.tracker.finalize(patch_id) {
                    self.send_payload(Payload::PatchApplied { patch: info }).await;
                }
            }
            Ok(Err(e)) => {
                self.tracker.discard(patch_id);
                self.send_terminal_error(&format!("edited diff failed to apply: {e}")).await;
            }
            Err(e) => {
                self.tracker.discard(patch_id);
                warn!(error = %e, "Edited diff apply task failed");
            }
        }
    }

    fn handle_undo(&self, patch_id: &str) {
        let tracker = Arc::clone(&self.tracker);
        let deferred = self.deferred_tx.clone();
        let patch_id = patch_id.to_string();
        tokio::task::spawn_blocking(move || {
            let report = tracker.undo(&patch_id);
            let payload = Payload::UndoResult {
                patch_id,
                success: report.success,
                error: report.error.map(|e| json!({
                    "code": e.code(),
                    "message": e.to_string(),
                })
                .to_string()),
                reverted_files: report.reverted_files,
            };
            let _ = deferred.blocking_send(payload);
        });
    }

    async fn handle_agent_control(
        &mut self,
        command: AgentCommand,
        agent_id: &str,
        config: Option<doomcode_proto::AgentConfig>,
    ) {
        match command {
            AgentCommand::Start => {
                if let Err(e) = self.supervisor.start(Some(agent_id)).await {
                    self.send_terminal_error(&format!("assistant failed to start: {e}")).await;
                }
            }
            AgentCommand::Stop => self.supervisor.stop().await,
            AgentCommand::Retry => {
                if let Err(e) = self.supervisor.retry().await {
                    self.send_terminal_error(&format!("retry failed: {e}")).await;
                }
            }
            AgentCommand::Configure => {
                self.supervisor.configure(config.unwrap_or_default());
            }
        }
    }

    async fn handle_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Output { data, sequence } => {
                self.send_payload(Payload::TerminalOutput {
                    stream: "stdout".to_string(),
                    data,
                    sequence,
                })
                .await;
            }
            SupervisorEvent::Permission { request_id, hit } => {
                self.send_payload(Payload::PermissionRequest {
                    request_id,
                    action: hit.action,
                    description: hit.description,
                    details: hit.details,
                    timeout: None,
                })
                .await;
            }
            SupervisorEvent::Diff {
                patch_id,
                diff,
                diff_text: _,
            } => {
                self.tracker.prepare(
                    &patch_id,
                    &self.supervisor.agent_id(),
                    &self.supervisor.last_prompt().unwrap_or_default(),
                    &diff,
                );

                let files: Vec<doomcode_proto::PatchFileSummary> = diff
                    .files
                    .iter()
                    .map(|f| doomcode_proto::PatchFileSummary {
                        path: f.path().to_string(),
                        additions: f.additions(),
                        deletions: f.deletions(),
                    })
                    .collect();
                let summary = format!(
                    "{} file{} changed, +{} -{}",
                    files.len(),
                    if files.len() == 1 { "" } else { "s" },
                    diff.total_additions(),
                    diff.total_deletions()
                );

                self.send_payload(Payload::DiffPatch {
                    patch_id,
                    estimated_risk: estimate_risk(&diff),
                    total_additions: diff.total_additions(),
                    total_deletions: diff.total_deletions(),
                    files,
                    summary,
                })
                .await;
            }
            SupervisorEvent::Status {
                status,
                last_prompt,
            } => {
                self.send_payload(Payload::AgentStatusUpdate {
                    agent_id: self.supervisor.agent_id(),
                    status,
                    last_prompt,
                })
                .await;
            }
            SupervisorEvent::Exited => {
                debug!("Agent subprocess exited");
            }
        }
    }

    async fn send_terminal_error(&mut self, message: &str) {
        let sequence = self.supervisor.last_sequence();
        self.send_payload(Payload::TerminalOutput {
            stream: "stdout".to_string(),
            data: format!("{message}\r\n"),
            sequence,
        })
        .await;
    }

    /// Seal and send a payload, or hold it until the operator key is known.
    async fn send_payload(&mut self, payload: Payload) {
        let Some(pair_box) = self.pair_box.clone() else {
            self.backlog.push(payload);
            return;
        };

        let result = payload
            .to_bytes()
            .map_err(ControllerError::from)
            .and_then(|bytes| pair_box.seal(&bytes).map_err(ControllerError::from));

        match result {
            Ok(sealed) => {
                let envelope = Envelope::new(
                    &self.session_id,
                    Role::Controller,
                    &sealed.nonce,
                    &sealed.ciphertext,
                );
                match envelope.encode() {
                    Ok(text) => {
                        if let Err(e) = self.link.send(text).await {
                            warn!(error = %e, "Envelope send failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Envelope encode failed"),
                }
            }
            Err(e) => warn!(error = %e, "Payload seal failed"),
        }
    }
}
