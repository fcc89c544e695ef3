//! Rolling scanner window.

/// Truncation threshold in bytes.
const MAX_BYTES: usize = 10_000;
/// Tail kept after truncation.
const KEEP_BYTES: usize = 5_000;

/// A bounded text window over the subprocess output stream.
///
/// When the window grows past 10 000 bytes it is cut back to roughly its
/// tail 5 000 bytes. The cut lands on the last newline before the tail when
/// one exists, so a half-emitted line (or diff) is never bisected; only when
/// the window is one giant unbroken line does the cut fall mid-line.
#[derive(Debug, Default)]
pub struct ScanWindow {
    buf: String,
}

impl ScanWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and apply the truncation policy.
    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        if self.buf.len() > MAX_BYTES {
            let mut cut = self.buf.len() - KEEP_BYTES;
            if let Some(newline) = self.buf[..cut].rfind('\n') {
                cut = newline + 1;
            }
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    pub fn contents(&self) -> &str {
        &self.buf
    }

    /// Drop everything buffered so far. Scanners reset on detection.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
