//! Bridge PTY backend.
//!
//! Fallback for hosts where the native PTY spawn fails (`posix_spawnp
//! failed` and friends): a small helper script allocates the PTY itself,
//! connects the assistant to its slave side, and proxies bytes over plain
//! pipes to this process. The helper also configures the slave terminal's
//! input line discipline: `ICRNL` stays on by default and is turned off
//! under the `lf` and `crlf` enter modes.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::pty::{pump_output, PtyBackend, DEFAULT_COLS, DEFAULT_ROWS};
use crate::config::{EnterMode, InputStyle};
use crate::error::ControllerError;

/// The helper that owns the PTY and speaks pipes to us.
const BRIDGE_SCRIPT: &str = r#"
import fcntl, os, pty, select, struct, sys, termios

mode = sys.argv[1]
cols, rows = int(sys.argv[2]), int(sys.argv[3])
cmd = sys.argv[4:]

pid, master = pty.fork()
if pid == 0:
    os.environ["TERM"] = "xterm-256color"
    os.environ["FORCE_COLOR"] = "1"
    os.environ["CI"] = "false"
    os.environ.setdefault("SHELL", "/bin/bash")
    os.execvp(cmd[0], cmd)

fcntl.ioctl(master, termios.TIOCSWINSZ, struct.pack("HHHH", rows, cols, 0, 0))

attrs = termios.tcgetattr(master)
if mode in ("lf", "crlf"):
    attrs[0] &= ~termios.ICRNL
else:
    attrs[0] |= termios.ICRNL
termios.tcsetattr(master, termios.TCSANOW, attrs)

while True:
    try:
        ready, _, _ = select.select([master, 0], [], [])
    except (OSError, KeyboardInterrupt):
        break
    if master in ready:
        try:
            data = os.read(master, 4096)
        except OSError:
            break
        if not data:
            break
        os.write(1, data)
    if 0 in ready:
        data = os.read(0, 4096)
        if not data:
            break
        os.write(master, data)

os.waitpid(pid, os.WNOHANG)
"#;

/// Bridge backend: the helper process proxies the PTY over pipes.
pub struct BridgePty {
    child: Mutex<Child>,
    input: Mutex<ChildStdin>,
}

impl BridgePty {
    /// Spawn the helper with the assistant as its wrapped command.
    pub fn spawn(
        program: &Path,
        working_dir: &Path,
        enter_mode: EnterMode,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), ControllerError> {
        let script_path = std::env::temp_dir().join("doomcode-pty-bridge.py");
        std::fs::write(&script_path, BRIDGE_SCRIPT).map_err(|e| ControllerError::SpawnFailed {
            reason: format!("write bridge helper: {e}"),
        })?;

        let mode = match enter_mode {
            EnterMode::Cr => "cr",
            EnterMode::Lf => "lf",
            EnterMode::Crlf => "crlf",
        };

        let mut child = Command::new("python3")
            .arg(&script_path)
            .arg(mode)
            .arg(DEFAULT_COLS.to_string())
            .arg(DEFAULT_ROWS.to_string())
            .arg(program)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ControllerError::SpawnFailed {
                reason: format!("bridge helper: {e}"),
            })?;

        let input = child.stdin.take().ok_or_else(|| ControllerError::SpawnFailed {
            reason: "bridge helper stdin unavailable".to_string(),
        })?;
        let output = child
            .stdout
            .take()
            .map(|stdout| pump_output(stdout, "bridge-pty"))
            .ok_or_else(|| ControllerError::SpawnFailed {
                reason: "bridge helper stdout unavailable".to_string(),
            })?;

        let backend = Self {
            child: Mutex::new(child),
            input: Mutex::new(input),
        };
        Ok((backend, output))
    }
}

impl PtyBackend for BridgePty {
    fn write(&self, bytes: &[u8]) -> Result<(), ControllerError> {
        let mut input = self.input.lock();
        input
            .write_all(bytes)
            .and_then(|()| input.flush())
            .map_err(|e| ControllerError::PtyWrite(e.to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), ControllerError> {
        // The pipe transport has no resize channel; the helper fixed the
        // window at spawn.
        debug!(cols, rows, "bridge backend ignores resize");
        Ok(())
    }

    fn kill(&self) {
        let mut child = self.child.lock();
        if let Err(e) = child.kill() {
            warn!(error = %e, "bridge helper kill failed");
        }
        let _ = child.wait();
    }

    fn preferred_style(&self) -> InputStyle {
        InputStyle::Typewrite
    }

    fn is_bridge(&self) -> bool {
        true
    }
}
