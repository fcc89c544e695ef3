//! Agent subprocess supervision.
//!
//! Owns the PTY backend and the scanner pipeline. Raw output chunks fan out
//! to the operator (tagged `stdout`, sequence-numbered) while the rolling
//! window feeds the permission detector and the diff extractor. All PTY
//! writes go through the single injector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use doomcode_proto::{AgentConfig, AgentStatus, PermissionDecision};

use crate::agent::input::InputInjector;
use crate::agent::locate::locate_agent_binary;
use crate::agent::pty::{provision, PtyBackend};
use crate::config::ControllerConfig;
use crate::diff::{parse_diff, ParsedDiff};
use crate::error::ControllerError;
use crate::scan::{DiffExtractor, PermissionDetector, PermissionHit, ScanWindow};

/// Events the supervisor emits toward the session runtime.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// Raw output chunk, in PTY byte order.
    Output { data: String, sequence: u64 },
    /// A detected approval prompt now awaiting the operator.
    Permission {
        request_id: String,
        hit: PermissionHit,
    },
    /// A complete unified diff extracted from the stream.
    Diff {
        patch_id: String,
        diff: ParsedDiff,
        diff_text: String,
    },
    /// Supervisor status changed.
    Status {
        status: AgentStatus,
        last_prompt: Option<String>,
    },
    /// The subprocess exited.
    Exited,
}

/// A prompt awaiting the operator's decision.
#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub request_id: String,
    pub hit: PermissionHit,
    pub requested_at: i64,
}

/// Supervises one assistant subprocess on a PTY.
pub struct AgentSupervisor {
    config: ControllerConfig,
    agent_id: RwLock<String>,
    status: RwLock<AgentStatus>,
    backend: RwLock<Option<Arc<dyn PtyBackend>>>,
    injector: RwLock<Option<Arc<InputInjector>>>,
    pending: RwLock<HashMap<String, PendingPermission>>,
    last_prompt: RwLock<Option<String>>,
    agent_config: RwLock<Option<AgentConfig>>,
    /// Generation guard: output tasks from a killed backend stop mutating
    /// state once a newer start has bumped this.
    generation: AtomicU64,
    sequence: AtomicU64,
    event_tx: mpsc::Sender<SupervisorEvent>,
}

impl AgentSupervisor {
    pub fn new(config: ControllerConfig, event_tx: mpsc::Sender<SupervisorEvent>) -> Arc<Self> {
        let agent_id = config.agent_name.clone();
        Arc::new(Self {
            config,
            agent_id: RwLock::new(agent_id),
            status: RwLock::new(AgentStatus::Idle),
            backend: RwLock::new(None),
            injector: RwLock::new(None),
            pending: RwLock::new(HashMap::new()),
            last_prompt: RwLock::new(None),
            agent_config: RwLock::new(None),
            generation: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            event_tx,
        })
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    pub fn agent_id(&self) -> String {
        self.agent_id.read().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.read().clone()
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn pending_permission_ids(&self) -> Vec<String> {
        self.pending.read().keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.backend.read().is_some()
    }

    /// Start (or restart) the assistant subprocess.
    ///
    /// Prefers the native PTY; falls back to the bridge helper when the
    /// native spawn fails. A start failure leaves the supervisor in `error`.
    pub async fn start(self: &Arc<Self>, agent_id: Option<&str>) -> Result<(), ControllerError> {
        if let Some(id) = agent_id {
            let current = self.agent_id();
            if id != current && self.is_running() {
                info!(from = %current, to = %id, "Switching agents");
                self.stop().await;
            }
            *self.agent_id.write() = id.to_string();
        }
        if self.is_running() {
            return Ok(());
        }

        let name = self.agent_id();
        let result = self.spawn_backend(&name);
        let (backend, output_rx) = match result {
            Ok(pair) => pair,
            Err(e) => {
                self.set_status(AgentStatus::Error).await;
                return Err(e);
            }
        };

        let injector = Arc::new(InputInjector::new(
            Arc::clone(&backend),
            self.config.enter_mode,
            self.config.forced_style,
            self.config.typewrite_delay_ms,
        ));

        *self.backend.write() = Some(backend);
        *self.injector.write() = Some(injector);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_output_task(output_rx, generation);
        self.set_status(AgentStatus::Running).await;
        info!(agent = %name, "Agent started");
        Ok(())
    }

    fn spawn_backend(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn PtyBackend>, mpsc::Receiver<Vec<u8>>), ControllerError> {
        let binary = locate_agent_binary(name)?;
        provision(&binary, &self.config.working_dir, self.config.enter_mode)
    }

    /// Kill the subprocess and drop pending input.
    pub async fn stop(self: &Arc<Self>) {
        let backend = self.backend.write().take();
        *self.injector.write() = None;
        self.pending.write().clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(backend) = backend {
            backend.kill();
            info!("Agent stopped");
        }
        self.set_status(AgentStatus::Idle).await;
    }

    /// Replay the last prompt. Starts the agent first when it is idle.
    pub async fn retry(self: &Arc<Self>) -> Result<(), ControllerError> {
        let Some(prompt) = self.last_prompt() else {
            debug!("Retry requested with no stored prompt");
            return Ok(());
        };
        if !self.is_running() {
            self.start(None).await?;
        }
        self.send_prompt(&prompt).await
    }

    /// Record configuration; full effect may require a restart.
    pub fn configure(&self, config: AgentConfig) {
        info!(?config, "Agent configuration recorded (restart may be required)");
        *self.agent_config.write() = Some(config);
    }

    pub fn configured(&self) -> Option<AgentConfig> {
        self.agent_config.read().clone()
    }

    /// Inject an operator prompt into the assistant.
    pub async fn send_prompt(self: &Arc<Self>, prompt: &str) -> Result<(), ControllerError> {
        *self.last_prompt.write() = Some(prompt.to_string());
        let injector = self.injector.read().clone();
        let Some(injector) = injector else {
            return Err(ControllerError::PtyWrite("agent is not running".to_string()));
        };
        if let Err(e) = injector.inject(prompt).await {
            self.set_status(AgentStatus::Error).await;
            return Err(e);
        }
        Ok(())
    }

    /// Answer a pending permission prompt. Returns `false` for an unknown
    /// request id.
    pub async fn resolve_permission(
        self: &Arc<Self>,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<bool, ControllerError> {
        let pending = self.pending.write().remove(request_id);
        if pending.is_none() {
            debug!(request_id, "Permission response for unknown request");
            return Ok(false);
        }

        let answer = if decision.is_approval() { "y" } else { "n" };
        let injector = self.injector.read().clone();
        let Some(injector) = injector else {
            return Err(ControllerError::PtyWrite("agent is not running".to_string()));
        };
        if let Err(e) = injector.write_answer(answer) {
            self.set_status(AgentStatus::Error).await;
            return Err(e);
        }
        self.set_status(AgentStatus::Running).await;
        info!(request_id, answer, "Permission prompt answered");
        Ok(true)
    }

    /// Write a y/n answer for a patch decision through the same discipline.
    pub async fn answer_patch_decision(
        self: &Arc<Self>,
        approve: bool,
    ) -> Result<(), ControllerError> {
        let injector = self.injector.read().clone();
        let Some(injector) = injector else {
            return Err(ControllerError::PtyWrite("agent is not running".to_string()));
        };
        injector.write_answer(if approve { "y" } else { "n" })
    }

    async fn set_status(&self, status: AgentStatus) {
        {
            let mut guard = self.status.write();
            if *guard == status {
                return;
            }
            *guard = status;
        }
        let _ = self
            .event_tx
            .send(SupervisorEvent::Status {
                status,
                last_prompt: self.last_prompt(),
            })
            .await;
    }

    fn spawn_output_task(self: &Arc<Self>, mut rx: mpsc::Receiver<Vec<u8>>, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut window = ScanWindow::new();
            let detector = PermissionDetector::new();
            let mut extractor = DiffExtractor::new();

            while let Some(chunk) = rx.recv().await {
                if this.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let text = String::from_utf8_lossy(&chunk).into_owned();
                let sequence = this.sequence.fetch_add(1, Ordering::SeqCst);
                let _ = this
                    .event_tx
                    .send(SupervisorEvent::Output {
                        data: text.clone(),
                        sequence,
                    })
                    .await;

                // The PTY line discipline emits CRLF; scanners work on
                // LF-normalized text while the operator gets raw bytes.
                let scan_text = text.replace('\r', "");
                window.push(&scan_text);
                if let Some(hit) = detector.detect(window.contents()) {
                    window.reset();
                    let request_id = doomcode_core::new_id();
                    this.pending.write().insert(
                        request_id.clone(),
                        PendingPermission {
                            request_id: request_id.clone(),
                            hit: hit.clone(),
                            requested_at: doomcode_core::unix_timestamp_ms(),
                        },
                    );
                    this.set_status(AgentStatus::WaitingInput).await;
                    let _ = this
                        .event_tx
                        .send(SupervisorEvent::Permission { request_id, hit })
                        .await;
                }

                if let Some(diff_text) = extractor.feed(&scan_text) {
                    let diff = parse_diff(&diff_text);
                    if !diff.is_empty() {
                        window.reset();
                        let _ = this
                            .event_tx
                            .send(SupervisorEvent::Diff {
                                patch_id: doomcode_core::new_id(),
                                diff,
                                diff_text,
                            })
                            .await;
                    }
                }
            }

            // Child exit: only the current generation moves the status.
            if this.generation.load(Ordering::SeqCst) == generation {
                *this.backend.write() = None;
                *this.injector.write() = None;
                this.set_status(AgentStatus::Idle).await;
                let _ = this.event_tx.send(SupervisorEvent::Exited).await;
            }
        });
    }
}
