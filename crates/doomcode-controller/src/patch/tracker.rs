//! Deterministic patch tracking with reverse-diff undo.
//!
//! For every incoming patch the tracker records, per file, the current
//! on-disk SHA-256 and a reverse diff before the agent applies anything
//! (`prepare`), then the post-apply hash once it has (`finalize`). `undo`
//! verifies nothing drifted since the apply and reverts file by file.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use doomcode_proto::{AppliedPatchInfo, PatchFileRecord};

use crate::diff::{format_diff, parse_diff, reverse_file_diff, FileChange, ParsedDiff};
use crate::patch::apply::apply_file_diff;

/// Bound on tracked history; overflow evicts the oldest record.
pub const MAX_HISTORY: usize = 50;

/// One file tracked by an applied patch.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    /// Path relative to the tracker root.
    pub path: String,
    pub change: FileChange,
    /// SHA-256 of the on-disk content before apply; `None` when the file did
    /// not exist.
    pub before_hash: Option<String>,
    /// SHA-256 after apply; `None` when the patch deleted the file.
    pub after_hash: Option<String>,
    /// Unified diff that undoes this file's changes.
    pub reverse_diff: String,
    /// Full original content, kept for deletions the reverse diff cannot
    /// reconstruct.
    pub original_content: Option<String>,
}

/// An accepted patch with everything needed to revert it.
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub patch_id: String,
    pub timestamp: i64,
    pub agent_id: String,
    pub prompt: String,
    pub files: Vec<TrackedFile>,
}

impl AppliedPatch {
    /// Wire form for `patch_applied`.
    pub fn to_info(&self) -> AppliedPatchInfo {
        AppliedPatchInfo {
            patch_id: self.patch_id.clone(),
            timestamp: self.timestamp,
            agent_id: self.agent_id.clone(),
            prompt: self.prompt.clone(),
            files: self
                .files
                .iter()
                .map(|f| PatchFileRecord {
                    path: f.path.clone(),
                    before_hash: f.before_hash.clone(),
                    after_hash: f.after_hash.clone(),
                    reverse_diff: f.reverse_diff.clone(),
                })
                .collect(),
        }
    }
}

/// Undo failure kinds; all leave the filesystem unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UndoError {
    #[error("patch not found: {patch_id}")]
    PatchNotFound { patch_id: String },

    #[error("file drifted since apply: {path}")]
    FileDrifted { path: String },

    #[error("file missing since apply: {path}")]
    FileMissing { path: String },

    #[error("reverse apply failed for {path}: {reason}")]
    ReverseApplyFailed { path: String, reason: String },
}

impl UndoError {
    /// Stable code for the operator UI.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PatchNotFound { .. } => "patch_not_found",
            Self::FileDrifted { .. } => "file_drifted",
            Self::FileMissing { .. } => "file_missing",
            Self::ReverseApplyFailed { .. } => "reverse_apply_failed",
        }
    }
}

/// Result of an undo attempt.
#[derive(Debug, Clone)]
pub struct UndoReport {
    pub success: bool,
    pub reverted_files: Vec<String>,
    pub error: Option<UndoError>,
}

/// What the execution pass will do for one file.
enum PlannedAction {
    /// Remove the file (reverse of an added file).
    Delete,
    /// Write this exact content.
    Write(String),
    /// Run the native patch tool over the reverse diff; falls back to
    /// writing the precomputed content when the tool unexpectedly fails
    /// after a clean check.
    Tool { diff_text: String, fallback: String },
}

/// Tracker of applied patches, bounded history newest-first.
pub struct PatchTracker {
    root: PathBuf,
    history: Mutex<VecDeque<AppliedPatch>>,
}

impl PatchTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Record a patch before the agent applies it: per-file before-hash,
    /// reverse diff, and original content for deletions.
    pub fn prepare(
        &self,
        patch_id: &str,
        agent_id: &str,
        prompt: &str,
        diff: &ParsedDiff,
    ) -> AppliedPatch {
        let files = diff
            .files
            .iter()
            .map(|file| {
                let path = file.path().to_string();
                let disk = std::fs::read_to_string(self.resolve(&path)).ok();
                let reverse = ParsedDiff {
                    files: vec![reverse_file_diff(file)],
                };
                TrackedFile {
                    before_hash: disk.as_deref().map(sha256_hex),
                    after_hash: None,
                    reverse_diff: format_diff(&reverse),
                    original_content: if file.change == FileChange::Deleted {
                        disk
                    } else {
                        None
                    },
                    change: file.change,
                    path,
                }
            })
            .collect();

        let patch = AppliedPatch {
            patch_id: patch_id.to_string(),
            timestamp: doomcode_core::unix_timestamp_ms(),
            agent_id: agent_id.to_string(),
            prompt: prompt.to_string(),
            files,
        };

        let mut history = self.history.lock();
        history.push_front(patch.clone());
        while history.len() > MAX_HISTORY {
            history.pop_back();
        }
        patch
    }

    /// Record post-apply hashes once the agent has applied the patch.
    pub fn finalize(&self, patch_id: &str) -> Option<AppliedPatchInfo> {
        let mut history = self.history.lock();
        let patch = history.iter_mut().find(|p| p.patch_id == patch_id)?;
        for file in &mut patch.files {
            file.after_hash = std::fs::read_to_string(self.root.join(&file.path))
                .ok()
                .as_deref()
                .map(sha256_hex);
        }
        Some(patch.to_info())
    }

    pub fn get(&self, patch_id: &str) -> Option<AppliedPatch> {
        self.history
            .lock()
            .iter()
            .find(|p| p.patch_id == patch_id)
            .cloned()
    }

    /// Drop a record without touching the filesystem (e.g. rejected patch).
    pub fn discard(&self, patch_id: &str) {
        self.history.lock().retain(|p| p.patch_id != patch_id);
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.history
            .lock()
            .iter()
            .map(|p| p.patch_id.clone())
            .collect()
    }

    /// Undo an applied patch.
    ///
    /// Verification and planning happen before any write: when a file has
    /// drifted, gone missing, or a reverse diff does not apply, the
    /// filesystem is left exactly as found. Files revert in reverse order of
    /// their appearance in the patch.
    pub fn undo(&self, patch_id: &str) -> UndoReport {
        let Some(patch) = self.get(patch_id) else {
            return failed(UndoError::PatchNotFound {
                patch_id: patch_id.to_string(),
            });
        };

        // Pass 1: every file must still be exactly where apply left it.
        for file in &patch.files {
            let actual = std::fs::read_to_string(self.resolve(&file.path))
                .ok()
                .as_deref()
                .map(sha256_hex);
            match (&file.after_hash, actual) {
                (Some(_), None) => {
                    return failed(UndoError::FileMissing {
                        path: file.path.clone(),
                    });
                }
                (Some(expected), Some(found)) if *expected != found => {
                    return failed(UndoError::FileDrifted {
                        path: file.path.clone(),
                    });
                }
                (None, Some(_)) => {
                    // The patch deleted this file; something recreated it.
                    return failed(UndoError::FileDrifted {
                        path: file.path.clone(),
                    });
                }
                _ => {}
            }
        }

        // Pass 2: plan every revert in memory, reverse file order.
        let mut plan: Vec<(String, PlannedAction)> = Vec::new();
        for file in patch.files.iter().rev() {
            let action = match self.plan_file(file) {
                Ok(action) => action,
                Err(error) => return failed(error),
            };
            plan.push((file.path.clone(), action));
        }

        // Pass 3: execute. One file at a time, in the planned order.
        let mut reverted = Vec::new();
        for (path, action) in plan {
            if let Err(error) = self.execute(&path, action) {
                return UndoReport {
                    success: false,
                    reverted_files: reverted,
                    error: Some(error),
                };
            }
            reverted.push(path);
        }

        self.discard(patch_id);
        UndoReport {
            success: true,
            reverted_files: reverted,
            error: None,
        }
    }

    fn plan_file(&self, file: &TrackedFile) -> Result<PlannedAction, UndoError> {
        match file.change {
            FileChange::Added => Ok(PlannedAction::Delete),
            FileChange::Deleted => match &file.original_content {
                Some(content) => Ok(PlannedAction::Write(content.clone())),
                // A reverse diff for a deletion cannot reconstruct the file.
                None => Err(UndoError::ReverseApplyFailed {
                    path: file.path.clone(),
                    reason: "original content of deleted file was not captured".to_string(),
                }),
            },
            FileChange::Binary => Err(UndoError::ReverseApplyFailed {
                path: file.path.clone(),
                reason: "binary patches cannot be reversed".to_string(),
            }),
            FileChange::Modified | FileChange::Renamed => {
                let current = std::fs::read_to_string(self.resolve(&file.path)).map_err(|e| {
                    UndoError::ReverseApplyFailed {
                        path: file.path.clone(),
                        reason: e.to_string(),
                    }
                })?;

                let reversed = parse_diff(&file.reverse_diff);
                let Some(reverse_file) = reversed.files.first() else {
                    return Err(UndoError::ReverseApplyFailed {
                        path: file.path.clone(),
                        reason: "empty reverse diff".to_string(),
                    });
                };

                let manual = apply_file_diff(&current, reverse_file);
                if patch_tool_check(&self.root, &file.reverse_diff) {
                    // The tool agreed with the reverse diff; keep the manual
                    // result around in case the real run still fails.
                    let fallback = manual.unwrap_or(current);
                    Ok(PlannedAction::Tool {
                        diff_text: file.reverse_diff.clone(),
                        fallback,
                    })
                } else {
                    match manual {
                        Ok(content) => Ok(PlannedAction::Write(content)),
                        Err(e) => Err(UndoError::ReverseApplyFailed {
                            path: file.path.clone(),
                            reason: e.to_string(),
                        }),
                    }
                }
            }
        }
    }

    fn execute(&self, path: &str, action: PlannedAction) -> Result<(), UndoError> {
        let full = self.resolve(path);
        let io_err = |e: std::io::Error| UndoError::ReverseApplyFailed {
            path: path.to_string(),
            reason: e.to_string(),
        };

        match action {
            PlannedAction::Delete => std::fs::remove_file(&full).map_err(io_err),
            PlannedAction::Write(content) => {
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err)?;
                }
                std::fs::write(&full, content).map_err(io_err)
            }
            PlannedAction::Tool {
                diff_text,
                fallback,
            } => {
                if patch_tool_apply(&self.root, &diff_text) {
                    Ok(())
                } else {
                    warn!(path, "patch tool failed after clean check, writing computed content");
                    std::fs::write(&full, fallback).map_err(io_err)
                }
            }
        }
    }
}

/// SHA-256 of a string, lowercase hex.
pub fn sha256_hex(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// `patch --dry-run` over the reverse diff; `false` when the tool is missing
/// or rejects the diff.
fn patch_tool_check(root: &Path, diff_text: &str) -> bool {
    run_patch_tool(root, diff_text, true)
}

fn patch_tool_apply(root: &Path, diff_text: &str) -> bool {
    run_patch_tool(root, diff_text, false)
}

fn run_patch_tool(root: &Path, diff_text: &str, dry_run: bool) -> bool {
    let mut cmd = Command::new("patch");
    cmd.arg("-p1").arg("--silent").current_dir(root);
    if dry_run {
        cmd.arg("--dry-run");
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let Ok(mut child) = cmd.spawn() else {
        debug!("patch tool unavailable");
        return false;
    };
    if let Some(stdin) = child.stdin.as_mut() {
        if stdin.write_all(diff_text.as_bytes()).is_err() {
            let _ = child.kill();
            return false;
        }
    }
    matches!(child.wait(), Ok(status) if status.success())
}

fn failed(error: UndoError) -> UndoReport {
    UndoReport {
        success: false,
        reverted_files: Vec::new(),
        error: Some(error),
    }
}
