//! Unified-diff parsing and formatting.
//!
//! Invoked by the output scanner to structure extracted diffs and by the
//! patch tracker to build reverse diffs. Handles git extended headers
//! (new/deleted file modes, renames, binary markers), `/dev/null` path
//! markers and the implicit one-line hunk count.

mod parser;
mod reverse;

pub use parser::{format_diff, parse_diff};
pub use reverse::reverse_file_diff;

/// Kind of a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Addition,
    Deletion,
    /// Verbatim passthrough, e.g. `\ No newline at end of file`.
    Header,
}

/// One line inside a hunk, stored without its prefix character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub content: String,
}

impl DiffLine {
    pub fn context(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Context,
            content: content.into(),
        }
    }

    pub fn addition(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Addition,
            content: content.into(),
        }
    }

    pub fn deletion(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Deletion,
            content: content.into(),
        }
    }
}

/// One `@@` hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u64,
    pub old_lines: u64,
    pub new_start: u64,
    pub new_lines: u64,
    /// Trailing section text after the closing `@@`, without leading space.
    pub section: String,
    pub lines: Vec<DiffLine>,
}

/// How a file is changed by the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileChange {
    #[default]
    Modified,
    Added,
    Deleted,
    Renamed,
    Binary,
}

/// One file's worth of diff.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDiff {
    /// Path on the old side, `a/` prefix stripped; `None` for added files.
    pub old_path: Option<String>,
    /// Path on the new side, `b/` prefix stripped; `None` for deleted files.
    pub new_path: Option<String>,
    pub change: FileChange,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// The path this diff is about: the new side, falling back to the old
    /// side for deletions.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    pub fn additions(&self) -> u64 {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Addition)
            .count() as u64
    }

    pub fn deletions(&self) -> u64 {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Deletion)
            .count() as u64
    }
}

/// A parsed diff: files with derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedDiff {
    pub files: Vec<FileDiff>,
}

impl ParsedDiff {
    pub fn total_additions(&self) -> u64 {
        self.files.iter().map(FileDiff::additions).sum()
    }

    pub fn total_deletions(&self) -> u64 {
        self.files.iter().map(FileDiff::deletions).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
