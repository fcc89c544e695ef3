//! Payload kinds carried inside envelopes.
//!
//! These are E2E-encrypted JSON objects, discriminated by `type`. The relay
//! never sees them; only the two endpoints encode and decode payloads.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Supervisor status of the assistant subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    WaitingInput,
    Error,
}

/// Action class of a detected permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    FileRead,
    FileWrite,
    ShellCommand,
    Other,
}

/// Operator decision on a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Approve,
    Deny,
    ApproveAlways,
    DenyAlways,
}

impl PermissionDecision {
    /// Whether this decision approves the prompt.
    pub const fn is_approval(self) -> bool {
        matches!(self, Self::Approve | Self::ApproveAlways)
    }
}

/// Operator decision on a proposed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchDecisionKind {
    Apply,
    Reject,
    Edit,
}

/// Risk estimate attached to a `diff_patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Operator command for the agent supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCommand {
    Start,
    Stop,
    Retry,
    Configure,
}

/// Agent configuration sent with `agent_control {configure}`.
///
/// Recorded by the supervisor; a full effect may require a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_permissions: Option<serde_json::Value>,
}

/// Per-file change counts in a `diff_patch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFileSummary {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
}

/// Per-file record inside an applied patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFileRecord {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_hash: Option<String>,
    pub reverse_diff: String,
}

/// An accepted patch as tracked by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPatchInfo {
    pub patch_id: String,
    pub timestamp: i64,
    pub agent_id: String,
    pub prompt: String,
    pub files: Vec<PatchFileRecord>,
}

/// The discriminated union of everything that travels E2E-encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Raw assistant output bytes, controller → operator.
    #[serde(rename_all = "camelCase")]
    TerminalOutput {
        stream: String,
        data: String,
        sequence: u64,
    },

    /// A prompt for the assistant, operator → controller.
    #[serde(rename_all = "camelCase")]
    UserPrompt {
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// A detected approval prompt awaiting the operator's decision.
    #[serde(rename_all = "camelCase")]
    PermissionRequest {
        request_id: String,
        action: PermissionAction,
        description: String,
        details: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    #[serde(rename_all = "camelCase")]
    PermissionResponse {
        request_id: String,
        decision: PermissionDecision,
    },

    /// A unified diff extracted from the assistant's output.
    #[serde(rename_all = "camelCase")]
    DiffPatch {
        patch_id: String,
        files: Vec<PatchFileSummary>,
        summary: String,
        estimated_risk: RiskLevel,
        total_additions: u64,
        total_deletions: u64,
    },

    #[serde(rename_all = "camelCase")]
    PatchDecision {
        patch_id: String,
        decision: PatchDecisionKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        edited_diff: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PatchApplied { patch: AppliedPatchInfo },

    #[serde(rename_all = "camelCase")]
    UndoRequest { patch_id: String },

    #[serde(rename_all = "camelCase")]
    UndoResult {
        patch_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        reverted_files: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    AgentControl {
        command: AgentCommand,
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<AgentConfig>,
    },

    #[serde(rename_all = "camelCase")]
    AgentStatusUpdate {
        agent_id: String,
        status: AgentStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_prompt: Option<String>,
    },

    /// Liveness signal, both directions.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        timestamp: i64,
        agent_status: AgentStatus,
    },

    /// Resync snapshot, controller → operator.
    #[serde(rename_all = "camelCase")]
    SessionState {
        agent_id: String,
        agent_status: AgentStatus,
        last_sequence: u64,
        pending_permission_ids: Vec<String>,
        tracked_patch_ids: Vec<String>,
    },
}

impl Payload {
    /// Serialize to the bytes that get sealed into an envelope.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse decrypted envelope bytes back into a payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn terminal_output_wire_shape() {
        let payload = Payload::TerminalOutput {
            stream: "stdout".into(),
            data: "ok\n".into(),
            sequence: 0,
        };
        let bytes = payload.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "terminal_output");
        assert_eq!(value["stream"], "stdout");
        assert_eq!(value["data"], "ok\n");
        assert_eq!(value["sequence"], 0);
    }

    #[test]
    fn permission_request_roundtrip() {
        let payload = Payload::PermissionRequest {
            request_id: "req-1".into(),
            action: PermissionAction::FileWrite,
            description: "Write to file: README.md".into(),
            details: serde_json::json!({"path": "README.md"}),
            timeout: None,
        };
        let decoded = Payload::from_bytes(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn permission_action_tags() {
        let bytes = Payload::PermissionRequest {
            request_id: "r".into(),
            action: PermissionAction::ShellCommand,
            description: String::new(),
            details: serde_json::Value::Null,
            timeout: Some(30),
        }
        .to_bytes()
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["action"], "shell_command");
        assert_eq!(value["timeout"], 30);
    }

    #[test]
    fn decision_approval_classes() {
        assert!(PermissionDecision::Approve.is_approval());
        assert!(PermissionDecision::ApproveAlways.is_approval());
        assert!(!PermissionDecision::Deny.is_approval());
        assert!(!PermissionDecision::DenyAlways.is_approval());
    }

    #[test]
    fn diff_patch_roundtrip() {
        let payload = Payload::DiffPatch {
            patch_id: "p1".into(),
            files: vec![PatchFileSummary {
                path: "src/main.rs".into(),
                additions: 3,
                deletions: 1,
            }],
            summary: "1 file changed".into(),
            estimated_risk: RiskLevel::Low,
            total_additions: 3,
            total_deletions: 1,
        };
        let decoded = Payload::from_bytes(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn risk_levels_order() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn undo_result_omits_absent_error() {
        let bytes = Payload::UndoResult {
            patch_id: "p1".into(),
            success: true,
            error: None,
            reverted_files: vec!["foo.txt".into()],
        }
        .to_bytes()
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("error"));
        assert!(text.contains("revertedFiles"));
    }

    #[test]
    fn agent_control_with_config() {
        let payload = Payload::AgentControl {
            command: AgentCommand::Configure,
            agent_id: "claude".into(),
            config: Some(AgentConfig {
                model: Some("opus".into()),
                temperature: Some(0.2),
                tool_permissions: None,
            }),
        };
        let decoded = Payload::from_bytes(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn heartbeat_carries_status() {
        let bytes = Payload::Heartbeat {
            timestamp: 1_700_000_000_000,
            agent_status: AgentStatus::WaitingInput,
        }
        .to_bytes()
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["agentStatus"], "waiting_input");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Payload::from_bytes(br#"{"type":"time_travel"}"#).is_err());
    }
}
