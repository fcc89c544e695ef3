//! PTY backends.
//!
//! The assistant must run attached to a pseudo-terminal; many interactive
//! assistants refuse to produce output otherwise. Two backends hide behind
//! one trait so the rest of the supervisor never cares which is active.
//! [`provision`] picks between them: the native PTY first, the bridge
//! helper in [`crate::agent::bridge`] when the native spawn fails.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{EnterMode, InputStyle};
use crate::error::ControllerError;

/// Initial terminal window.
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 40;

/// Depth of the raw-output channel between a pump thread and the supervisor.
const OUTPUT_DEPTH: usize = 64;
/// Read granularity of a pump thread.
const READ_CHUNK: usize = 8192;

/// The surface the supervisor drives, independent of which backend owns the
/// terminal.
pub trait PtyBackend: Send + Sync {
    fn write(&self, bytes: &[u8]) -> Result<(), ControllerError>;
    fn resize(&self, cols: u16, rows: u16) -> Result<(), ControllerError>;
    fn kill(&self);
    /// The injection style that works reliably on this backend.
    fn preferred_style(&self) -> InputStyle;
    /// Whether this is the bridge backend (typewrite prepends `ESC` there).
    fn is_bridge(&self) -> bool;
}

/// Provision a terminal for the assistant.
///
/// Native PTY libraries are flaky on some hosts (`posix_spawnp failed`); a
/// native failure falls through to the bridge helper, which allocates the
/// PTY in its own process and proxies pipes.
pub fn provision(
    program: &Path,
    working_dir: &Path,
    enter_mode: EnterMode,
) -> Result<(Arc<dyn PtyBackend>, mpsc::Receiver<Vec<u8>>), ControllerError> {
    match NativePty::spawn(program, working_dir) {
        Ok((native, output)) => Ok((Arc::new(native) as Arc<dyn PtyBackend>, output)),
        Err(native_err) => {
            warn!(error = %native_err, "Native PTY spawn failed, using bridge");
            let (bridge, output) =
                crate::agent::bridge::BridgePty::spawn(program, working_dir, enter_mode)?;
            Ok((Arc::new(bridge) as Arc<dyn PtyBackend>, output))
        }
    }
}

/// Bridge a blocking byte source into the async world.
///
/// Both backends hand their raw output stream here; the thread lives until
/// the stream ends or the supervisor drops the receiver.
pub(crate) fn pump_output<R>(source: R, label: &'static str) -> mpsc::Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (chunk_tx, chunk_rx) = mpsc::channel(OUTPUT_DEPTH);
    std::thread::spawn(move || {
        let mut source = source;
        let mut scratch = vec![0u8; READ_CHUNK];
        loop {
            match source.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if chunk_tx.blocking_send(scratch[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
        debug!(label, "output pump finished");
    });
    chunk_rx
}

/// The terminal environment interactive assistants expect:
/// `TERM=xterm-256color`, `FORCE_COLOR=1`, `CI=false`, a concrete `SHELL`.
fn assistant_command(program: &Path, working_dir: &Path) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(program);
    cmd.cwd(working_dir);
    cmd.env("TERM", "xterm-256color");
    cmd.env("FORCE_COLOR", "1");
    cmd.env("CI", "false");
    cmd.env(
        "SHELL",
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
    );
    cmd
}

fn window(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn stage_err(stage: &'static str, err: impl std::fmt::Display) -> ControllerError {
    ControllerError::SpawnFailed {
        reason: format!("{stage}: {err}"),
    }
}

/// Native PTY backend.
pub struct NativePty {
    terminal: Mutex<Box<dyn MasterPty + Send>>,
    input: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl NativePty {
    /// Spawn the assistant on a fresh 120x40 PTY.
    pub fn spawn(
        program: &Path,
        working_dir: &Path,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), ControllerError> {
        let pty = native_pty_system()
            .openpty(window(DEFAULT_COLS, DEFAULT_ROWS))
            .map_err(|e| stage_err("openpty", e))?;

        let child = pty
            .slave
            .spawn_command(assistant_command(program, working_dir))
            .map_err(|e| stage_err("spawn", e))?;

        let input = pty
            .master
            .take_writer()
            .map_err(|e| stage_err("take writer", e))?;
        let output = pty
            .master
            .try_clone_reader()
            .map(|reader| pump_output(reader, "native-pty"))
            .map_err(|e| stage_err("clone reader", e))?;

        let backend = Self {
            terminal: Mutex::new(pty.master),
            input: Mutex::new(input),
            child: Mutex::new(child),
        };
        Ok((backend, output))
    }
}

impl PtyBackend for NativePty {
    fn write(&self, bytes: &[u8]) -> Result<(), ControllerError> {
        let mut input = self.input.lock();
        input
            .write_all(bytes)
            .and_then(|()| input.flush())
            .map_err(|e| ControllerError::PtyWrite(e.to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), ControllerError> {
        self.terminal
            .lock()
            .resize(window(cols, rows))
            .map_err(|e| ControllerError::PtyWrite(format!("resize: {e}")))
    }

    fn kill(&self) {
        let mut child = self.child.lock();
        let _ = child.kill();
        let _ = child.wait();
    }

    fn preferred_style(&self) -> InputStyle {
        InputStyle::Line
    }

    fn is_bridge(&self) -> bool {
        false
    }
}
