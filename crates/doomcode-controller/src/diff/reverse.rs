//! Reverse-diff construction.
//!
//! A reverse diff undoes a patch: additions flip to deletions and vice
//! versa, and each hunk's old/new ranges swap. The file header paths stay
//! as they are so the reverse applies against the same file.
//!
//! Reversing is lossy for deletions (the removed file's content is not in
//! the forward diff); the patch tracker stores original content for those
//! separately instead of relying on this transform.

use super::{DiffLine, FileChange, FileDiff, Hunk, LineKind};

/// Build the reverse of a single file's diff.
pub fn reverse_file_diff(file: &FileDiff) -> FileDiff {
    let change = match file.change {
        FileChange::Added => FileChange::Deleted,
        FileChange::Deleted => FileChange::Added,
        other => other,
    };

    FileDiff {
        old_path: file.old_path.clone().or_else(|| file.new_path.clone()),
        new_path: file.new_path.clone().or_else(|| file.old_path.clone()),
        change,
        hunks: file.hunks.iter().map(reverse_hunk).collect(),
    }
}

fn reverse_hunk(hunk: &Hunk) -> Hunk {
    Hunk {
        old_start: hunk.new_start,
        old_lines: hunk.new_lines,
        new_start: hunk.old_start,
        new_lines: hunk.old_lines,
        section: hunk.section.clone(),
        lines: hunk.lines.iter().map(flip_line).collect(),
    }
}

fn flip_line(line: &DiffLine) -> DiffLine {
    let kind = match line.kind {
        LineKind::Addition => LineKind::Deletion,
        LineKind::Deletion => LineKind::Addition,
        other => other,
    };
    DiffLine {
        kind,
        content: line.content.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::{format_diff, parse_diff, ParsedDiff};

    #[test]
    fn reverse_flips_additions_and_deletions() {
        let diff = parse_diff(
            "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,3 +1,3 @@
 keep
-old
+new
",
        );
        let reversed = reverse_file_diff(&diff.files[0]);
        let lines = &reversed.hunks[0].lines;
        assert_eq!(lines[0].kind, LineKind::Context);
        assert_eq!(lines[1], DiffLine::addition("old"));
        assert_eq!(lines[2], DiffLine::deletion("new"));
    }

    #[test]
    fn reverse_swaps_hunk_ranges() {
        let diff = parse_diff(
            "\
--- a/foo.txt
+++ b/foo.txt
@@ -5,3 +5,6 @@
 a
+b
+c
+d
 e
",
        );
        let reversed = reverse_file_diff(&diff.files[0]);
        let hunk = &reversed.hunks[0];
        assert_eq!((hunk.old_start, hunk.old_lines), (5, 6));
        assert_eq!((hunk.new_start, hunk.new_lines), (5, 3));
    }

    #[test]
    fn reverse_of_reverse_is_identity() {
        let diff = parse_diff(
            "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,4 +1,3 @@
 a
-b
 c
 d
",
        );
        let twice = reverse_file_diff(&reverse_file_diff(&diff.files[0]));
        assert_eq!(twice, diff.files[0]);
    }

    #[test]
    fn reverse_of_added_file_is_a_deletion() {
        let diff = parse_diff(
            "\
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,1 @@
+hello
",
        );
        let reversed = reverse_file_diff(&diff.files[0]);
        assert_eq!(reversed.change, FileChange::Deleted);
        assert_eq!(reversed.hunks[0].lines[0].kind, LineKind::Deletion);
    }

    #[test]
    fn reversed_diff_formats_and_reparses() {
        let diff = parse_diff(
            "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,2 +1,3 @@
 a
+b
 c
",
        );
        let reversed = ParsedDiff {
            files: vec![reverse_file_diff(&diff.files[0])],
        };
        let reparsed = parse_diff(&format_diff(&reversed));
        assert_eq!(reparsed, reversed);
    }
}
