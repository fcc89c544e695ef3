//! Permission prompt detection.
//!
//! A fixed, ordered list of patterns recognizes common approval prompts in
//! the raw output stream and extracts a structured action/description/details
//! triple. First match wins; order goes from most to least specific.

use doomcode_proto::PermissionAction;
use regex::Regex;
use serde_json::json;

/// A recognized approval prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionHit {
    pub action: PermissionAction,
    pub description: String,
    pub details: serde_json::Value,
}

struct Pattern {
    regex: Regex,
    build: fn(&regex::Captures<'_>) -> PermissionHit,
}

/// Ordered prompt matcher over the scanner window.
pub struct PermissionDetector {
    patterns: Vec<Pattern>,
}

impl Default for PermissionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionDetector {
    #[allow(clippy::expect_used)] // the pattern list is fixed at build time
    pub fn new() -> Self {
        let pattern = |re: &str, build: fn(&regex::Captures<'_>) -> PermissionHit| Pattern {
            regex: Regex::new(re).expect("static pattern compiles"),
            build,
        };

        let patterns = vec![
            pattern(
                r"(?i)do you want to (?:write to|create|overwrite|edit) ([^\s?]+)\?",
                |caps| PermissionHit {
                    action: PermissionAction::FileWrite,
                    description: format!("Write to file: {}", &caps[1]),
                    details: json!({ "path": &caps[1] }),
                },
            ),
            pattern(
                r"(?i)do you want to read (?:from )?([^\s?]+)\?",
                |caps| PermissionHit {
                    action: PermissionAction::FileRead,
                    description: format!("Read file: {}", &caps[1]),
                    details: json!({ "path": &caps[1] }),
                },
            ),
            pattern(
                r"(?i)do you want to (?:run|execute)(?: the command)?[:]? ?`?([^`\n?]+?)`?\?",
                |caps| PermissionHit {
                    action: PermissionAction::ShellCommand,
                    description: format!("Run command: {}", caps[1].trim()),
                    details: json!({ "command": caps[1].trim() }),
                },
            ),
            pattern(
                r"(?i)allow ([^\s?]+) to ([^?\n]+)\?",
                |caps| PermissionHit {
                    action: PermissionAction::Other,
                    description: format!("Allow {} to {}", &caps[1], caps[2].trim()),
                    details: json!({ "subject": &caps[1], "request": caps[2].trim() }),
                },
            ),
            pattern(
                r"(?m)^(.*)\s*\[y/n\]\s*$",
                |caps| PermissionHit {
                    action: PermissionAction::Other,
                    description: {
                        let prompt = caps[1].trim();
                        if prompt.is_empty() {
                            "Assistant is asking for confirmation".to_string()
                        } else {
                            prompt.to_string()
                        }
                    },
                    details: json!({ "prompt": caps[1].trim() }),
                },
            ),
            pattern(
                r"(?i)\((?:y(?:es)?/n(?:o)?)\)",
                |_| PermissionHit {
                    action: PermissionAction::Other,
                    description: "Assistant is asking for confirmation".to_string(),
                    details: json!({}),
                },
            ),
        ];

        Self { patterns }
    }

    /// Scan the window; the first matching pattern produces the hit.
    pub fn detect(&self, window: &str) -> Option<PermissionHit> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.regex.captures(window) {
                return Some((pattern.build)(&caps));
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_write_prompt() {
        let detector = PermissionDetector::new();
        let hit = detector
            .detect("Do you want to write to README.md? [y/n]")
            .unwrap();
        assert_eq!(hit.action, PermissionAction::FileWrite);
        assert_eq!(hit.description, "Write to file: README.md");
        assert_eq!(hit.details["path"], "README.md");
    }

    #[test]
    fn file_read_prompt() {
        let detector = PermissionDetector::new();
        let hit = detector
            .detect("Do you want to read src/main.rs? (y/n)")
            .unwrap();
        assert_eq!(hit.action, PermissionAction::FileRead);
        assert_eq!(hit.details["path"], "src/main.rs");
    }

    #[test]
    fn shell_command_prompt() {
        let detector = PermissionDetector::new();
        let hit = detector
            .detect("Do you want to run `cargo build --release`? [y/n]")
            .unwrap();
        assert_eq!(hit.action, PermissionAction::ShellCommand);
        assert_eq!(hit.details["command"], "cargo build --release");
    }

    #[test]
    fn allow_prompt_is_other() {
        let detector = PermissionDetector::new();
        let hit = detector
            .detect("Allow assistant to access the network?")
            .unwrap();
        assert_eq!(hit.action, PermissionAction::Other);
        assert!(hit.description.starts_with("Allow assistant"));
    }

    #[test]
    fn bare_yn_prompt_is_other() {
        let detector = PermissionDetector::new();
        let hit = detector.detect("Proceed with the change? [y/n]\n").unwrap();
        assert_eq!(hit.action, PermissionAction::Other);
        assert_eq!(hit.description, "Proceed with the change?");
    }

    #[test]
    fn ordering_prefers_specific_patterns() {
        // A write prompt also ends with [y/n]; the specific pattern wins.
        let detector = PermissionDetector::new();
        let hit = detector
            .detect("noise before\nDo you want to write to a.txt? [y/n]\n")
            .unwrap();
        assert_eq!(hit.action, PermissionAction::FileWrite);
    }

    #[test]
    fn plain_output_is_not_a_prompt() {
        let detector = PermissionDetector::new();
        assert!(detector.detect("compiling doomcode v0.3.0").is_none());
        assert!(detector.detect("").is_none());
    }
}
