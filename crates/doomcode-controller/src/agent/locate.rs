//! Assistant binary discovery.
//!
//! Probes a fixed list of filesystem roots first, then falls back to a
//! `PATH` search. Failing to locate the binary is a fatal start error.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::ControllerError;

/// Fixed roots probed before `PATH`.
fn fixed_roots() -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.insert(0, home.join(".local/bin"));
        roots.push(home.join("bin"));
        roots.push(home.join(".npm-global/bin"));
        roots.push(home.join(".volta/bin"));
    }
    roots
}

/// Locate the configured assistant binary.
pub fn locate_agent_binary(name: &str) -> Result<PathBuf, ControllerError> {
    // An explicit path is used as-is.
    if name.contains('/') {
        let path = PathBuf::from(name);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ControllerError::AgentNotFound {
            name: name.to_string(),
        });
    }

    for root in fixed_roots() {
        let candidate = root.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let path_env = env::var_os("PATH").unwrap_or_else(|| OsString::from("/usr/local/bin:/usr/bin:/bin"));
    for dir in env::split_paths(&path_env) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(ControllerError::AgentNotFound {
        name: name.to_string(),
    })
}
