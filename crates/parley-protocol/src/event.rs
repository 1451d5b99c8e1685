//! The streaming event vocabulary for one user turn.
//!
//! The backend answers a turn submission with an ordered frame sequence;
//! each frame is one [`StreamEvent`]. The union is closed on purpose: an
//! unrecognized `"type"` tag is a decode failure, so adding a tenth event
//! kind is a compile-time-enforced change everywhere the stream is consumed.
//!
//! Events carry no sequence numbers. Ordering is guaranteed solely by
//! arrival order on one connection.

use crate::ids::{AgentId, ApprovalId, MessageId, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One frame of the turn stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// The backend handed the turn to a different agent. Attributes the
    /// *next* `message-start`; carries no message id of its own.
    AgentSwitch {
        agent_id: AgentId,
        agent_role: String,
        agent_name: String,
    },
    /// Opens a new, empty assistant message.
    MessageStart {
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },
    /// Appends a text fragment to an open message.
    TextDelta { message_id: MessageId, delta: String },
    /// A tool invocation started under an open message.
    ToolCall {
        message_id: MessageId,
        tool_call: ToolCallPayload,
    },
    /// Resolves a previously announced tool call. Matched by id; never
    /// creates a new entry.
    ToolResult {
        message_id: MessageId,
        tool_call_id: ToolCallId,
        result: String,
        status: ToolResultStatus,
    },
    /// A risk-gated operation awaiting human consent.
    ApprovalRequest {
        message_id: MessageId,
        approval: ApprovalPayload,
    },
    /// Finalizes the text of an open message. Nested tool calls and the
    /// approval request may still resolve afterwards.
    MessageEnd { message_id: MessageId },
    /// Clean end of the turn. No further frames follow.
    Done,
    /// The turn failed server-side. No further frames follow.
    Error { message: String },
}

impl StreamEvent {
    /// Whether this frame closes the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Wire shape of a tool invocation, nested in `tool-call` frames and in
/// persisted message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub id: ToolCallId,
    pub name: String,
    pub category: ToolCategory,
    pub risk_level: RiskLevel,
    pub is_local: bool,
    #[serde(default)]
    pub params: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Wire shape of an approval request, nested in `approval-request` frames
/// and in persisted message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPayload {
    pub id: ApprovalId,
    pub tool_name: String,
    pub reason: String,
    pub risk_level: RiskLevel,
    pub policy_source: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}

/// Coarse tool classification, for display and policy routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    File,
    Browser,
    Terminal,
    System,
    Api,
}

/// Coarse risk classification driving whether human consent is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Tool call lifecycle. `Running` is the only non-terminal state; once
/// `Success` or `Error` the status never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Success,
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome carried by a `tool-result` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Success,
    Error,
}

impl From<ToolResultStatus> for ToolCallStatus {
    fn from(status: ToolResultStatus) -> Self {
        match status {
            ToolResultStatus::Success => Self::Success,
            ToolResultStatus::Error => Self::Error,
        }
    }
}

/// Approval lifecycle. `Pending` is the only non-terminal state. A locally
/// observed expiry is advisory; the server remains authoritative, so a late
/// server-delivered `Approved`/`Rejected` overrides a local `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_switch_wire_shape() {
        let event = StreamEvent::AgentSwitch {
            agent_id: AgentId::from_string("a1"),
            agent_role: "coordinator".into(),
            agent_name: "Coordinator".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "agent-switch",
                "agentId": "a1",
                "agentRole": "coordinator",
                "agentName": "Coordinator",
            })
        );
    }

    #[test]
    fn text_delta_roundtrip() {
        let json = r#"{"type":"text-delta","messageId":"m1","delta":"收"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            StreamEvent::TextDelta {
                message_id: MessageId::from_string("m1"),
                delta: "收".into(),
            }
        );
        let back = serde_json::to_string(&event).unwrap();
        let reparsed: StreamEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(event, reparsed);
    }

    #[test]
    fn message_start_tolerates_missing_agent_id() {
        let json = r#"{"type":"message-start","messageId":"m1"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            StreamEvent::MessageStart { agent_id: None, .. }
        ));
    }

    #[test]
    fn tool_call_frame_roundtrip() {
        let json = r#"{
            "type": "tool-call",
            "messageId": "m2",
            "toolCall": {
                "id": "tc1",
                "name": "file_search",
                "category": "file",
                "riskLevel": "low",
                "isLocal": true,
                "params": {"pattern": "*.rs"},
                "status": "running"
            }
        }"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        let StreamEvent::ToolCall { tool_call, .. } = event else {
            panic!("expected tool-call");
        };
        assert_eq!(tool_call.id.as_str(), "tc1");
        assert_eq!(tool_call.category, ToolCategory::File);
        assert_eq!(tool_call.status, ToolCallStatus::Running);
        assert_eq!(tool_call.result, None);
    }

    #[test]
    fn approval_request_frame_roundtrip() {
        let json = r#"{
            "type": "approval-request",
            "messageId": "m2",
            "approval": {
                "id": "ap1",
                "toolName": "shell_exec",
                "reason": "destructive command",
                "riskLevel": "critical",
                "policySource": "workspace-policy",
                "params": {"command": "rm -rf build"},
                "expiresAt": "2026-01-01T00:05:00Z",
                "status": "pending"
            }
        }"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        let StreamEvent::ApprovalRequest { approval, .. } = event else {
            panic!("expected approval-request");
        };
        assert_eq!(approval.risk_level, RiskLevel::Critical);
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(approval.policy_source, "workspace-policy");
    }

    #[test]
    fn done_and_error_are_terminal() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(
            StreamEvent::Error {
                message: "boom".into()
            }
            .is_terminal()
        );
        assert!(
            !StreamEvent::MessageEnd {
                message_id: MessageId::from_string("m1")
            }
            .is_terminal()
        );
    }

    #[test]
    fn unknown_type_tag_fails_to_decode() {
        let json = r#"{"type":"telemetry-blip","messageId":"m1"}"#;
        assert!(serde_json::from_str::<StreamEvent>(json).is_err());
    }

    #[test]
    fn tool_result_status_converts_to_call_status() {
        assert_eq!(
            ToolCallStatus::from(ToolResultStatus::Success),
            ToolCallStatus::Success
        );
        assert_eq!(
            ToolCallStatus::from(ToolResultStatus::Error),
            ToolCallStatus::Error
        );
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }
}
