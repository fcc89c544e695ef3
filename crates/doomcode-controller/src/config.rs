//! Controller configuration.
//!
//! CLI arguments have the highest priority; the `DOOMCODE_*` environment
//! variables tune input-injection behavior underneath them.

use std::path::PathBuf;

/// Enter-key suffix written after a line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnterMode {
    #[default]
    Cr,
    Lf,
    Crlf,
}

impl EnterMode {
    /// The bytes appended after the payload in line style.
    pub const fn suffix(self) -> &'static [u8] {
        match self {
            Self::Cr => b"\r",
            Self::Lf => b"\n",
            Self::Crlf => b"\r\n",
        }
    }

    /// Parse the `DOOMCODE_ENTER_MODE` value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cr" => Some(Self::Cr),
            "lf" => Some(Self::Lf),
            "crlf" => Some(Self::Crlf),
            _ => None,
        }
    }

    /// Read from the environment, defaulting to `cr`.
    pub fn from_env() -> Self {
        std::env::var("DOOMCODE_ENTER_MODE")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// How input is injected into the assistant PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStyle {
    /// Write the payload followed by the enter suffix once.
    Line,
    /// Per-character pacing followed by a force-submit.
    Typewrite,
}

/// Per-character delay for typewrite injection.
pub const DEFAULT_TYPEWRITE_DELAY_MS: u64 = 5;

/// Controller runtime configuration assembled from CLI flags and env vars.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Duplex transport URL, e.g. `wss://relay.example/ws`.
    pub ws_url: String,
    /// Session bootstrap URL, e.g. `https://relay.example`.
    pub http_url: String,
    /// Working directory the assistant runs in.
    pub working_dir: PathBuf,
    /// Assistant binary name to supervise.
    pub agent_name: String,
    pub enter_mode: EnterMode,
    /// Forced input style from `DOOMCODE_TYPEWRITE`; `None` lets the backend
    /// pick.
    pub forced_style: Option<InputStyle>,
    pub typewrite_delay_ms: u64,
}

impl ControllerConfig {
    pub fn new(ws_url: String, http_url: String, working_dir: PathBuf, agent_name: String) -> Self {
        let forced_style = match std::env::var("DOOMCODE_TYPEWRITE").as_deref() {
            Ok("1") => Some(InputStyle::Typewrite),
            Ok("0") => Some(InputStyle::Line),
            _ => None,
        };
        let typewrite_delay_ms = std::env::var("DOOMCODE_TYPEWRITE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TYPEWRITE_DELAY_MS);

        Self {
            ws_url,
            http_url,
            working_dir,
            agent_name,
            enter_mode: EnterMode::from_env(),
            forced_style,
            typewrite_delay_ms,
        }
    }
}
