//! Unified-diff text parsing and canonical formatting.

use super::{DiffLine, FileChange, FileDiff, Hunk, LineKind, ParsedDiff};

/// Strip the conventional `a/` / `b/` prefix from a diff path.
fn strip_prefix(path: &str) -> Option<String> {
    if path == "/dev/null" {
        return None;
    }
    let stripped = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(stripped.to_string())
}

/// Parse a `@@ -o[,ol] +n[,nl] @@ section` header. An omitted count means an
/// implicit one-line hunk.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ ")?;
    let close = rest.find(" @@")?;
    let (ranges, tail) = rest.split_at(close);
    let section = tail
        .strip_prefix(" @@")
        .map(|s| s.strip_prefix(' ').unwrap_or(s))
        .unwrap_or("")
        .to_string();

    let mut parts = ranges.split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let parse_range = |range: &str| -> Option<(u64, u64)> {
        match range.split_once(',') {
            Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
            None => Some((range.parse().ok()?, 1)),
        }
    };
    let (old_start, old_lines) = parse_range(old)?;
    let (new_start, new_lines) = parse_range(new)?;

    Some(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        section,
        lines: Vec::new(),
    })
}

/// Parse unified-diff text into files, hunks and typed lines.
///
/// Tolerant of leading noise: scanning starts at the first file header.
pub fn parse_diff(input: &str) -> ParsedDiff {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut in_hunk = false;

    let finish = |files: &mut Vec<FileDiff>, current: &mut Option<FileDiff>| {
        if let Some(file) = current.take() {
            let real = !file.hunks.is_empty()
                || matches!(file.change, FileChange::Binary | FileChange::Renamed)
                || file.old_path.is_some()
                || file.new_path.is_some();
            if real {
                files.push(file);
            }
        }
    };

    for line in input.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            finish(&mut files, &mut current);
            let mut file = FileDiff::default();
            // `diff --git a/old b/new`; paths refine via ---/+++ below.
            let mut parts = rest.split(' ');
            file.old_path = parts.next().and_then(strip_prefix);
            file.new_path = parts.next().and_then(strip_prefix);
            current = Some(file);
            in_hunk = false;
            continue;
        }

        if let Some(file) = current.as_mut() {
            if !in_hunk {
                if line.starts_with("new file mode") {
                    file.change = FileChange::Added;
                    continue;
                }
                if line.starts_with("deleted file mode") {
                    file.change = FileChange::Deleted;
                    continue;
                }
                if let Some(from) = line.strip_prefix("rename from ") {
                    file.change = FileChange::Renamed;
                    file.old_path = Some(from.to_string());
                    continue;
                }
                if let Some(to) = line.strip_prefix("rename to ") {
                    file.change = FileChange::Renamed;
                    file.new_path = Some(to.to_string());
                    continue;
                }
                if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
                    file.change = FileChange::Binary;
                    continue;
                }
                if line.starts_with("index ")
                    || line.starts_with("old mode")
                    || line.starts_with("new mode")
                    || line.starts_with("similarity index")
                {
                    continue;
                }
            }
        }

        // Only `a/...` and `/dev/null` shapes count as file headers: a
        // deletion of a line beginning with `--` would otherwise masquerade
        // as one.
        if let Some(path) = line.strip_prefix("--- ") {
            let trimmed = path.trim_end();
            if trimmed == "/dev/null" || trimmed.starts_with("a/") {
                // A bare `--- a/...` also opens a file when no git header
                // preceded.
                if current.is_none() || in_hunk {
                    finish(&mut files, &mut current);
                    current = Some(FileDiff::default());
                    in_hunk = false;
                }
                if let Some(file) = current.as_mut() {
                    file.old_path = strip_prefix(trimmed);
                    if file.old_path.is_none() {
                        file.change = FileChange::Added;
                    }
                }
                continue;
            }
        }
        if let Some(path) = line.strip_prefix("+++ ") {
            let trimmed = path.trim_end();
            if trimmed == "/dev/null" || trimmed.starts_with("b/") {
                if let Some(file) = current.as_mut() {
                    file.new_path = strip_prefix(trimmed);
                    if file.new_path.is_none() {
                        file.change = FileChange::Deleted;
                    }
                }
                continue;
            }
        }

        if line.starts_with("@@") {
            if let Some(hunk) = parse_hunk_header(line) {
                if let Some(file) = current.as_mut() {
                    file.hunks.push(hunk);
                    in_hunk = true;
                }
            }
            continue;
        }

        if in_hunk {
            let Some(file) = current.as_mut() else {
                continue;
            };
            let Some(hunk) = file.hunks.last_mut() else {
                continue;
            };
            if let Some(content) = line.strip_prefix('+') {
                hunk.lines.push(DiffLine::addition(content));
            } else if let Some(content) = line.strip_prefix('-') {
                hunk.lines.push(DiffLine::deletion(content));
            } else if let Some(content) = line.strip_prefix(' ') {
                hunk.lines.push(DiffLine::context(content));
            } else if line.starts_with('\\') {
                hunk.lines.push(DiffLine {
                    kind: LineKind::Header,
                    content: line.to_string(),
                });
            } else if line.is_empty() {
                // Some producers emit context blank lines without the space.
                hunk.lines.push(DiffLine::context(""));
            } else {
                // Anything else ends the hunk region for this file.
                in_hunk = false;
            }
        }
    }

    finish(&mut files, &mut current);
    ParsedDiff { files }
}

/// Format a parsed diff back to canonical unified-diff text.
///
/// `parse_diff(format_diff(d)) == d` holds for every diff this crate
/// produces.
pub fn format_diff(diff: &ParsedDiff) -> String {
    let mut out = String::new();
    for file in &diff.files {
        format_file(&mut out, file);
    }
    out
}

fn format_file(out: &mut String, file: &FileDiff) {
    let old_name = file.old_path.as_deref();
    let new_name = file.new_path.as_deref();
    let git_old = old_name.or(new_name).unwrap_or("");
    let git_new = new_name.or(old_name).unwrap_or("");

    out.push_str(&format!("diff --git a/{git_old} b/{git_new}\n"));
    match file.change {
        FileChange::Added => out.push_str("new file mode 100644\n"),
        FileChange::Deleted => out.push_str("deleted file mode 100644\n"),
        FileChange::Renamed => {
            out.push_str(&format!("rename from {git_old}\n"));
            out.push_str(&format!("rename to {git_new}\n"));
        }
        FileChange::Binary => {
            out.push_str(&format!("Binary files a/{git_old} and b/{git_new} differ\n"));
            return;
        }
        FileChange::Modified => {}
    }

    if file.hunks.is_empty() {
        return;
    }

    match old_name {
        Some(name) => out.push_str(&format!("--- a/{name}\n")),
        None => out.push_str("--- /dev/null\n"),
    }
    match new_name {
        Some(name) => out.push_str(&format!("+++ b/{name}\n")),
        None => out.push_str("+++ /dev/null\n"),
    }

    for hunk in &file.hunks {
        if hunk.section.is_empty() {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            ));
        } else {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@ {}\n",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines, hunk.section
            ));
        }
        for line in &hunk.lines {
            match line.kind {
                LineKind::Context => {
                    out.push(' ');
                    out.push_str(&line.content);
                }
                LineKind::Addition => {
                    out.push('+');
                    out.push_str(&line.content);
                }
                LineKind::Deletion => {
                    out.push('-');
                    out.push_str(&line.content);
                }
                LineKind::Header => out.push_str(&line.content),
            }
            out.push('\n');
        }
    }
}
