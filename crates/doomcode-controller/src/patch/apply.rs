//! Manual line-based hunk application.
//!
//! Used when the native `patch` tool is unavailable or rejects a diff. Works
//! on whole lines: each hunk's old block (context + deletions) must match at
//! its stated position, or anywhere in the file as a fallback.

use thiserror::Error;

use crate::diff::{FileDiff, LineKind};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("hunk #{hunk} does not match file content")]
    HunkMismatch { hunk: usize },
}

/// Apply one file's diff to `content` and return the patched text.
pub fn apply_file_diff(content: &str, diff: &FileDiff) -> Result<String, ApplyError> {
    let had_trailing_newline = content.is_empty() || content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut offset: i64 = 0;

    for (index, hunk) in diff.hunks.iter().enumerate() {
        let old_block: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Context | LineKind::Deletion))
            .map(|l| l.content.as_str())
            .collect();
        let new_block: Vec<String> = hunk
            .lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Context | LineKind::Addition))
            .map(|l| l.content.clone())
            .collect();

        // `old_start` is 1-based; 0 means "insert at the very top".
        let intended = (hunk.old_start as i64 - 1 + offset).max(0) as usize;
        let position = find_block(&lines, &old_block, intended)
            .ok_or(ApplyError::HunkMismatch { hunk: index + 1 })?;

        let new_len = new_block.len() as i64;
        let old_len = old_block.len() as i64;
        lines.splice(position..position + old_block.len(), new_block);
        offset += new_len - old_len;
    }

    let mut out = lines.join("\n");
    if had_trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Find where `block` matches in `lines`, preferring `intended`, then
/// scanning the whole file for the first exact match.
fn find_block(lines: &[String], block: &[&str], intended: usize) -> Option<usize> {
    let matches_at = |pos: usize| -> bool {
        pos + block.len() <= lines.len()
            && block
                .iter()
                .zip(&lines[pos..pos + block.len()])
                .all(|(expected, actual)| *expected == actual)
    };

    if block.is_empty() {
        // Pure insertion: trust the stated position, clamped to the file.
        return Some(intended.min(lines.len()));
    }
    if matches_at(intended) {
        return Some(intended);
    }
    (0..=lines.len().saturating_sub(block.len())).find(|&pos| matches_at(pos))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;

    fn single_file(input: &str) -> FileDiff {
        parse_diff(input).files.remove(0)
    }

    #[test]
    fn applies_a_simple_replacement() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -1,3 +1,3 @@
 one
-two
+TWO
 three
",
        );
        let out = apply_file_diff("one\ntwo\nthree\n", &diff).unwrap();
        assert_eq!(out, "one\nTWO\nthree\n");
    }

    #[test]
    fn applies_at_shifted_position() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -2,2 +2,2 @@
 b
-c
+C
",
        );
        // The block actually lives two lines later than stated.
        let out = apply_file_diff("x\ny\nz\nb\nc\n", &diff).unwrap();
        assert_eq!(out, "x\ny\nz\nb\nC\n");
    }

    #[test]
    fn pure_insertion_hunk() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -0,0 +1,2 @@
+first
+second
",
        );
        let out = apply_file_diff("old\n", &diff).unwrap();
        assert_eq!(out, "first\nsecond\nold\n");
    }

    #[test]
    fn multi_hunk_offsets_compound() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -1,2 +1,3 @@
 a
+a2
 b
@@ -4,2 +5,1 @@
 d
-e
",
        );
        let out = apply_file_diff("a\nb\nc\nd\ne\n", &diff).unwrap();
        assert_eq!(out, "a\na2\nb\nc\nd\n");
    }

    #[test]
    fn mismatch_is_an_error() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -1,2 +1,2 @@
 something
-that is not there
+whatever
",
        );
        let err = apply_file_diff("entirely\ndifferent\n", &diff).unwrap_err();
        assert!(matches!(err, ApplyError::HunkMismatch { hunk: 1 }));
    }

    #[test]
    fn deleting_every_line_leaves_empty_output() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -1,2 +0,0 @@
-a
-b
",
        );
        let out = apply_file_diff("a\nb\n", &diff).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn no_trailing_newline_is_preserved() {
        let diff = single_file(
            "\
--- a/f
+++ b/f
@@ -1,1 +1,1 @@
-old
+new
",
        );
        let out = apply_file_diff("old", &diff).unwrap();
        assert_eq!(out, "new");
    }
}
