//! Patch tracking and undo.

mod apply;
mod tracker;

pub use apply::{apply_file_diff, ApplyError};
pub use tracker::{
    sha256_hex, AppliedPatch, PatchTracker, TrackedFile, UndoError, UndoReport, MAX_HISTORY,
};

use std::path::Path;

use crate::diff::{FileChange, ParsedDiff};
use crate::error::ControllerError;

/// Apply a whole diff to a working tree.
///
/// Plans every file in memory first; nothing is written until all files
/// apply cleanly. Returns the touched paths.
pub fn apply_diff_to_tree(
    root: &Path,
    diff: &ParsedDiff,
) -> Result<Vec<String>, ControllerError> {
    enum Action {
        Write(String),
        Delete,
    }

    let mut plan: Vec<(String, std::path::PathBuf, Action)> = Vec::new();
    for file in &diff.files {
        let rel = file.path().to_string();
        let full = root.join(&rel);
        match file.change {
            FileChange::Deleted => plan.push((rel, full, Action::Delete)),
            FileChange::Binary => {
                return Err(ControllerError::PatchApply(format!(
                    "binary file {rel} cannot be applied from a textual diff"
                )));
            }
            _ => {
                let current = if full.exists() {
                    std::fs::read_to_string(&full)?
                } else {
                    String::new()
                };
                let content = apply_file_diff(&current, file)
                    .map_err(|e| ControllerError::PatchApply(format!("{rel}: {e}")))?;
                plan.push((rel, full, Action::Write(content)));
            }
        }
    }

    let mut touched = Vec::new();
    for (rel, full, action) in plan {
        match action {
            Action::Write(content) => {
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full, content)?;
            }
            Action::Delete => {
                std::fs::remove_file(&full)?;
            }
        }
        touched.push(rel);
    }
    Ok(touched)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;
    use tempfile::TempDir;

    #[test]
    fn applies_modifications_and_creations() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

        let diff = parse_diff(
            "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
 one
-two
+TWO
diff --git a/b.txt b/b.txt
new file mode 100644
--- /dev/null
+++ b/b.txt
@@ -0,0 +1,1 @@
+fresh
",
        );
        let touched = apply_diff_to_tree(dir.path(), &diff).unwrap();
        assert_eq!(touched, vec!["a.txt", "b.txt"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\nTWO\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "fresh\n"
        );
    }

    #[test]
    fn failing_file_aborts_before_any_write() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

        let diff = parse_diff(
            "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
 one
-two
+TWO
diff --git a/c.txt b/c.txt
--- a/c.txt
+++ b/c.txt
@@ -1,1 +1,1 @@
-not there
+never lands
",
        );
        let err = apply_diff_to_tree(dir.path(), &diff).unwrap_err();
        assert!(matches!(err, ControllerError::PatchApply(_)));
        // The first file is untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\ntwo\n"
        );
    }
}
