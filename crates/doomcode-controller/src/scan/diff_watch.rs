//! Stateful unified-diff extraction from the output stream.
//!
//! Watches for diff markers to enter an in-diff mode that accumulates
//! subsequent output, then leaves the mode on an end heuristic: a
//! triple-newline tail, a shell-prompt tail, or an apply/summary sentence.

use regex::Regex;

/// Extraction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InDiff,
}

/// Stateful diff extractor over the shared scanner window.
pub struct DiffExtractor {
    state: State,
    buffer: String,
    prompt_tail: Regex,
    apply_sentence: Regex,
}

impl Default for DiffExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffExtractor {
    #[allow(clippy::expect_used)] // static patterns
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buffer: String::new(),
            prompt_tail: Regex::new(r"(?m)^[\w.~/-]*[$%#>] $").expect("static pattern compiles"),
            apply_sentence: Regex::new(r"(?i)\b(applied|applying|apply this|\d+ files? changed)\b")
                .expect("static pattern compiles"),
        }
    }

    pub fn in_diff(&self) -> bool {
        self.state == State::InDiff
    }

    /// Feed a chunk; returns a completed diff text when the end heuristic
    /// fires.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);

        if self.state == State::Idle {
            let start = self
                .buffer
                .find("diff --git ")
                .or_else(|| self.find_minus_marker());
            match start {
                Some(pos) => {
                    self.buffer.drain(..pos);
                    self.state = State::InDiff;
                }
                None => {
                    // Keep only a small tail so a marker split across chunks
                    // is still found.
                    if self.buffer.len() > 256 {
                        let cut = self.buffer.len() - 128;
                        let cut = self.char_boundary(cut);
                        self.buffer.drain(..cut);
                    }
                    return None;
                }
            }
        }

        self.try_finish()
    }

    /// `--- a/` at the start of a line marks a plain unified diff.
    fn find_minus_marker(&self) -> Option<usize> {
        if self.buffer.starts_with("--- a/") {
            return Some(0);
        }
        self.buffer.find("\n--- a/").map(|pos| pos + 1)
    }

    fn char_boundary(&self, mut index: usize) -> usize {
        while index < self.buffer.len() && !self.buffer.is_char_boundary(index) {
            index += 1;
        }
        index
    }

    fn try_finish(&mut self) -> Option<String> {
        // Only look past the first hunk so the heuristics cannot fire on
        // header noise.
        let body_start = self.buffer.find("@@")?;
        let tail = &self.buffer[body_start..];

        let mut end = None;
        if let Some(pos) = tail.find("\n\n\n") {
            end = Some(body_start + pos);
        }
        if let Some(m) = self.prompt_tail.find(tail) {
            let candidate = body_start + m.start();
            end = Some(end.map_or(candidate, |e: usize| e.min(candidate)));
        }
        if let Some(m) = self.apply_sentence.find(tail) {
            let candidate = body_start + m.start();
            end = Some(end.map_or(candidate, |e: usize| e.min(candidate)));
        }

        let end = end?;
        let diff_text = self.buffer[..end].trim_end().to_string();
        self.buffer.clear();
        self.state = State::Idle;
        if diff_text.is_empty() {
            None
        } else {
            Some(diff_text)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;

    const DIFF: &str = "\
diff --git a/foo.txt b/foo.txt
--- a/foo.txt
+++ b/foo.txt
@@ -1,2 +1,2 @@
 keep
-old
+new
";

    #[test]
    fn triple_newline_ends_the_diff() {
        let mut extractor = DiffExtractor::new();
        assert!(extractor.feed("let me change that file\n").is_none());
        assert!(extractor.feed(DIFF).is_none());
        assert!(extractor.in_diff());

        let text = extractor.feed("\n\n\nmoving on").unwrap();
        assert!(!extractor.in_diff());
        let parsed = parse_diff(&text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path(), "foo.txt");
    }

    #[test]
    fn shell_prompt_tail_ends_the_diff() {
        let mut extractor = DiffExtractor::new();
        extractor.feed(DIFF);
        let text = extractor.feed("\n~/project$ \n").unwrap();
        assert_eq!(parse_diff(&text).files.len(), 1);
    }

    #[test]
    fn apply_sentence_ends_the_diff() {
        let mut extractor = DiffExtractor::new();
        extractor.feed(DIFF);
        let text = extractor.feed("\n1 file changed, 1 insertion(+)\n").unwrap();
        let parsed = parse_diff(&text);
        assert_eq!(parsed.files[0].additions(), 1);
    }

    #[test]
    fn diff_split_across_chunks() {
        let mut extractor = DiffExtractor::new();
        for chunk in DIFF.as_bytes().chunks(7) {
            assert!(extractor.feed(std::str::from_utf8(chunk).unwrap()).is_none());
        }
        let text = extractor.feed("\n\n\n").unwrap();
        assert_eq!(parse_diff(&text).files.len(), 1);
    }

    #[test]
    fn plain_minus_marker_enters_diff_mode() {
        let mut extractor = DiffExtractor::new();
        extractor.feed("here:\n--- a/x.txt\n+++ b/x.txt\n@@ -1,1 +1,1 @@\n-a\n+b\n");
        assert!(extractor.in_diff());
        let text = extractor.feed("\n\n\n").unwrap();
        assert_eq!(parse_diff(&text).files[0].path(), "x.txt");
    }

    #[test]
    fn prose_never_enters_diff_mode() {
        let mut extractor = DiffExtractor::new();
        for _ in 0..100 {
            assert!(extractor
                .feed("ordinary assistant output without markers\n")
                .is_none());
        }
        assert!(!extractor.in_diff());
    }

    #[test]
    fn two_diffs_in_sequence() {
        let mut extractor = DiffExtractor::new();
        extractor.feed(DIFF);
        let first = extractor.feed("\n\n\n").unwrap();
        assert_eq!(parse_diff(&first).files[0].path(), "foo.txt");

        let second_diff = DIFF.replace("foo.txt", "bar.txt");
        extractor.feed(&second_diff);
        let second = extractor.feed("\n\n\n").unwrap();
        assert_eq!(parse_diff(&second).files[0].path(), "bar.txt");
    }
}
