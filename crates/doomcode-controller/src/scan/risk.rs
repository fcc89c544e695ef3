//! Risk estimation for extracted patches.

use doomcode_proto::RiskLevel;
use regex::Regex;

use crate::diff::ParsedDiff;

/// Thresholds from the patch review policy.
const HIGH_FILE_COUNT: usize = 10;
const HIGH_LINE_COUNT: u64 = 500;
const MEDIUM_FILE_COUNT: usize = 5;
const MEDIUM_LINE_COUNT: u64 = 100;

/// Paths whose changes always rate `high`: secrets-adjacent files, root
/// manifests and build configuration.
#[allow(clippy::expect_used)] // static pattern
fn sensitive_path() -> Regex {
    Regex::new(
        r"(?ix)
        (^|/)\.?env(\.|$)
        | (^|/)[^/]*(config|secret|credential|password|auth)[^/]*(/|$)
        | (^|/)[^/]*\.(key|pem)$
        | ^(Cargo\.toml|package\.json|pyproject\.toml|go\.mod|pom\.xml)$
        | (^|/)(Makefile|Dockerfile|build\.gradle|CMakeLists\.txt)$
        ",
    )
    .expect("static pattern compiles")
}

/// Estimate the review risk of a parsed diff.
pub fn estimate_risk(diff: &ParsedDiff) -> RiskLevel {
    let file_count = diff.files.len();
    let total_lines = diff.total_additions() + diff.total_deletions();

    let sensitive = sensitive_path();
    let touches_sensitive = diff.files.iter().any(|f| sensitive.is_match(f.path()));

    if touches_sensitive || file_count > HIGH_FILE_COUNT || total_lines > HIGH_LINE_COUNT {
        RiskLevel::High
    } else if file_count > MEDIUM_FILE_COUNT || total_lines > MEDIUM_LINE_COUNT {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
