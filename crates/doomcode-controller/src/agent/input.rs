//! Input injection discipline.
//!
//! Sending a prompt to the assistant is not "write a line": line-ending
//! behavior differs across backends and terminal line disciplines. The
//! injector supports a configurable enter mode and two styles:
//!
//! - **line**: payload plus the enter suffix, one write;
//! - **typewrite**: a leading `ESC` on the bridge backend (to break out of
//!   any composed-input mode), a prime delay, one code point at a time with
//!   per-character pacing, then a force-submit of `CR` and `LF` ~10 ms
//!   apart. The force-submit makes submission stick regardless of the
//!   assistant's chosen line discipline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::agent::pty::PtyBackend;
use crate::config::{EnterMode, InputStyle};
use crate::error::ControllerError;

/// Delay before the first typed character.
const PRIME_DELAY: Duration = Duration::from_millis(150);
/// Gap between the CR and LF of a force-submit.
const FORCE_SUBMIT_GAP: Duration = Duration::from_millis(10);

/// Injects operator input into the agent PTY through a single writer.
pub struct InputInjector {
    backend: Arc<dyn PtyBackend>,
    enter_mode: EnterMode,
    style: InputStyle,
    char_delay: Duration,
}

impl InputInjector {
    /// Build an injector; `forced_style` overrides the backend preference.
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        enter_mode: EnterMode,
        forced_style: Option<InputStyle>,
        char_delay_ms: u64,
    ) -> Self {
        let style = forced_style.unwrap_or_else(|| backend.preferred_style());
        Self {
            backend,
            enter_mode,
            style,
            char_delay: Duration::from_millis(char_delay_ms),
        }
    }

    pub const fn style(&self) -> InputStyle {
        self.style
    }

    /// Inject a full prompt using the configured style.
    pub async fn inject(&self, text: &str) -> Result<(), ControllerError> {
        match self.style {
            InputStyle::Line => self.write_line(text),
            InputStyle::Typewrite => self.typewrite(text).await,
        }
    }

    /// Write raw bytes straight through (used for y/n answers with the
    /// enter suffix).
    pub fn write_answer(&self, answer: &str) -> Result<(), ControllerError> {
        let mut bytes = answer.as_bytes().to_vec();
        bytes.extend_from_slice(self.enter_mode.suffix());
        self.backend.write(&bytes)
    }

    /// Line style: payload plus the enter suffix, one write.
    fn write_line(&self, text: &str) -> Result<(), ControllerError> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.extend_from_slice(self.enter_mode.suffix());
        self.backend.write(&bytes)
    }

    /// Typewrite style: paced characters followed by a force-submit.
    async fn typewrite(&self, text: &str) -> Result<(), ControllerError> {
        if self.backend.is_bridge() {
            // Break the assistant out of any composed-input mode first.
            self.backend.write(&[0x1b])?;
            sleep(PRIME_DELAY).await;
        }

        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.backend.write(ch.encode_utf8(&mut buf).as_bytes())?;
            sleep(self.char_delay).await;
        }

        self.force_submit().await
    }

    /// Both `CR` and `LF`, spaced, so submission lands whatever the line
    /// discipline.
    async fn force_submit(&self) -> Result<(), ControllerError> {
        self.backend.write(b"\r")?;
        sleep(FORCE_SUBMIT_GAP).await;
        self.backend.write(b"\n")?;
        debug!("force-submit issued");
        Ok(())
    }
}
