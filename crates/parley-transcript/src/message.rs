//! Transcript entry types: messages and their nested tool calls and
//! approval requests.
//!
//! A `user` message is always created complete. An `assistant` message is
//! opened empty by `message-start` and is mutable only while `Streaming`;
//! after `message-end` only the nested sub-entities may keep changing (a
//! tool can still be running when the surrounding text is done).

use chrono::{DateTime, Utc};
use parley_protocol::{
    AgentId, ApprovalId, ApprovalPayload, ApprovalStatus, AuthorKind, MessageId, MessageSnapshot,
    MessageStatus, RiskLevel, SessionId, ToolCallId, ToolCallPayload, ToolCallStatus, ToolCategory,
};
use serde::{Deserialize, Serialize};

/// The agent attributed to assistant messages, threaded through the
/// reducer as fold-local state (never a global).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub agent_role: String,
    pub agent_name: String,
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub author: AuthorKind,
    pub agent_id: Option<AgentId>,
    pub agent_role: Option<String>,
    pub agent_name: Option<String>,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub tool_calls: Vec<ToolCall>,
    pub approval: Option<ApprovalRequest>,
    /// Failure marker when `status` is `Error` ("cancelled", a connection
    /// error, or the server's own error message).
    pub error: Option<String>,
}

impl Message {
    /// A complete user message, synthesized client-side before the server
    /// confirms it.
    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::random(),
            session_id,
            author: AuthorKind::User,
            agent_id: None,
            agent_role: None,
            agent_name: None,
            content: content.into(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            tool_calls: Vec::new(),
            approval: None,
            error: None,
        }
    }

    /// An empty assistant message opened by `message-start`, attributed to
    /// the agent in effect at that point in the stream.
    pub fn assistant_open(id: MessageId, session_id: SessionId, agent: Option<&AgentContext>) -> Self {
        Self {
            id,
            session_id,
            author: AuthorKind::Assistant,
            agent_id: agent.map(|a| a.agent_id.clone()),
            agent_role: agent.map(|a| a.agent_role.clone()),
            agent_name: agent.map(|a| a.agent_name.clone()),
            content: String::new(),
            status: MessageStatus::Streaming,
            created_at: Utc::now(),
            tool_calls: Vec::new(),
            approval: None,
            error: None,
        }
    }

    /// Rebuild a finalized message from the history collaborator.
    pub fn from_snapshot(snapshot: MessageSnapshot) -> Self {
        let id = snapshot.id.clone();
        Self {
            tool_calls: snapshot
                .tool_calls
                .into_iter()
                .map(|payload| ToolCall::from_payload(id.clone(), payload))
                .collect(),
            approval: snapshot
                .approval
                .map(|payload| ApprovalRequest::from_payload(id.clone(), payload)),
            id: snapshot.id,
            session_id: snapshot.session_id,
            author: snapshot.author,
            agent_id: snapshot.agent_id,
            agent_role: snapshot.agent_role,
            agent_name: snapshot.agent_name,
            content: snapshot.content,
            status: snapshot.status,
            created_at: snapshot.created_at,
            error: None,
        }
    }

    /// Whether the message text may still change.
    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Ordered concatenation of deltas; the caller guarantees openness.
    pub fn append_delta(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// `message-end`: text finalized, nested entities may continue.
    pub fn finalize(&mut self) {
        self.status = MessageStatus::Sent;
    }

    /// Finalize as failed, recording why.
    pub fn fail(&mut self, marker: impl Into<String>) {
        self.status = MessageStatus::Error;
        self.error = Some(marker.into());
    }

    pub fn tool_call(&self, id: &ToolCallId) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| &call.id == id)
    }

    pub fn tool_call_mut(&mut self, id: &ToolCallId) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|call| &call.id == id)
    }
}

/// A nested, independently-lifecycled tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub message_id: MessageId,
    pub name: String,
    pub category: ToolCategory,
    pub risk_level: RiskLevel,
    pub is_local: bool,
    pub params: serde_json::Value,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ToolCall {
    pub fn from_payload(message_id: MessageId, payload: ToolCallPayload) -> Self {
        let (result, error) = match payload.status {
            ToolCallStatus::Error => (None, payload.result),
            _ => (payload.result, None),
        };
        Self {
            id: payload.id,
            message_id,
            name: payload.name,
            category: payload.category,
            risk_level: payload.risk_level,
            is_local: payload.is_local,
            params: payload.params,
            status: payload.status,
            result,
            error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a `tool-result`. Status is monotonic: once terminal, a second
    /// result is a no-op and `false` is returned.
    pub fn resolve(&mut self, status: ToolCallStatus, text: impl Into<String>) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        match status {
            ToolCallStatus::Success => self.result = Some(text.into()),
            ToolCallStatus::Error => self.error = Some(text.into()),
            ToolCallStatus::Running => unreachable!("non-terminal status rejected above"),
        }
        true
    }
}

/// A nested, single-instance risk gate awaiting human consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub message_id: MessageId,
    pub tool_name: String,
    pub reason: String,
    pub risk_level: RiskLevel,
    pub policy_source: String,
    pub params: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}

impl ApprovalRequest {
    pub fn from_payload(message_id: MessageId, payload: ApprovalPayload) -> Self {
        Self {
            id: payload.id,
            message_id,
            tool_name: payload.tool_name,
            reason: payload.reason,
            risk_level: payload.risk_level,
            policy_source: payload.policy_source,
            params: payload.params,
            expires_at: payload.expires_at,
            status: payload.status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time left before expiry, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }

    /// Locally-derived expiry. Advisory only: it renders a countdown of
    /// zero but must not block a later server-delivered resolution.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ApprovalStatus::Pending && now >= self.expires_at {
            self.status = ApprovalStatus::Expired;
            return true;
        }
        false
    }

    /// Apply a server-authoritative resolution. `Approved`/`Rejected` stick;
    /// a locally-inferred `Expired` yields to the server (last server write
    /// wins). Returns whether the transition was applied.
    pub fn resolve(&mut self, status: ApprovalStatus) -> bool {
        if status == ApprovalStatus::Pending {
            return false;
        }
        match self.status {
            ApprovalStatus::Pending | ApprovalStatus::Expired => {
                self.status = status;
                true
            }
            ApprovalStatus::Approved | ApprovalStatus::Rejected => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn running_call(id: &str) -> ToolCall {
        ToolCall::from_payload(
            MessageId::from_string("m1"),
            ToolCallPayload {
                id: ToolCallId::from_string(id),
                name: "file_search".into(),
                category: ToolCategory::File,
                risk_level: RiskLevel::Low,
                is_local: true,
                params: json!({"pattern": "*.rs"}),
                status: ToolCallStatus::Running,
                result: None,
            },
        )
    }

    fn pending_approval(expires_in: Duration) -> ApprovalRequest {
        ApprovalRequest::from_payload(
            MessageId::from_string("m1"),
            ApprovalPayload {
                id: ApprovalId::from_string("ap1"),
                tool_name: "shell_exec".into(),
                reason: "destructive".into(),
                risk_level: RiskLevel::High,
                policy_source: "workspace-policy".into(),
                params: json!({}),
                expires_at: Utc::now() + expires_in,
                status: ApprovalStatus::Pending,
            },
        )
    }

    #[test]
    fn user_message_is_created_complete() {
        let message = Message::user(SessionId::from_string("s1"), "hello");
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.author, AuthorKind::User);
        assert!(!message.is_open());
    }

    #[test]
    fn assistant_message_opens_empty_and_streaming() {
        let agent = AgentContext {
            agent_id: AgentId::from_string("a1"),
            agent_role: "coordinator".into(),
            agent_name: "Coordinator".into(),
        };
        let message = Message::assistant_open(
            MessageId::from_string("m1"),
            SessionId::from_string("s1"),
            Some(&agent),
        );
        assert!(message.is_open());
        assert!(message.content.is_empty());
        assert_eq!(message.agent_role.as_deref(), Some("coordinator"));
    }

    #[test]
    fn tool_call_first_result_wins() {
        let mut call = running_call("tc1");
        assert!(call.resolve(ToolCallStatus::Success, "ok"));
        assert!(!call.resolve(ToolCallStatus::Error, "late failure"));
        assert_eq!(call.status, ToolCallStatus::Success);
        assert_eq!(call.result.as_deref(), Some("ok"));
        assert_eq!(call.error, None);
    }

    #[test]
    fn tool_call_error_result_fills_error_text() {
        let mut call = running_call("tc2");
        assert!(call.resolve(ToolCallStatus::Error, "permission denied"));
        assert_eq!(call.error.as_deref(), Some("permission denied"));
        assert_eq!(call.result, None);
    }

    #[test]
    fn approval_remaining_clamps_at_zero() {
        let approval = pending_approval(Duration::seconds(-5));
        assert_eq!(approval.remaining(Utc::now()), std::time::Duration::ZERO);
        let approval = pending_approval(Duration::seconds(60));
        assert!(approval.remaining(Utc::now()) > std::time::Duration::from_secs(50));
    }

    #[test]
    fn local_expiry_yields_to_server_resolution() {
        let mut approval = pending_approval(Duration::seconds(-1));
        assert!(approval.mark_expired(Utc::now()));
        assert_eq!(approval.status, ApprovalStatus::Expired);
        // Server is authoritative: a late approval still lands.
        assert!(approval.resolve(ApprovalStatus::Approved));
        assert_eq!(approval.status, ApprovalStatus::Approved);
        // But a resolved approval never reverts.
        assert!(!approval.resolve(ApprovalStatus::Rejected));
        assert_eq!(approval.status, ApprovalStatus::Approved);
    }

    #[test]
    fn mark_expired_is_a_noop_before_the_deadline() {
        let mut approval = pending_approval(Duration::seconds(600));
        assert!(!approval.mark_expired(Utc::now()));
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    #[test]
    fn snapshot_roundtrip_preserves_nested_entities() {
        let snapshot = MessageSnapshot {
            id: MessageId::from_string("m9"),
            session_id: SessionId::from_string("s1"),
            author: AuthorKind::Assistant,
            agent_id: Some(AgentId::from_string("a1")),
            agent_role: Some("developer".into()),
            agent_name: Some("Dev".into()),
            content: "done".into(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            tool_calls: vec![ToolCallPayload {
                id: ToolCallId::from_string("tc1"),
                name: "file_search".into(),
                category: ToolCategory::File,
                risk_level: RiskLevel::Low,
                is_local: true,
                params: json!({}),
                status: ToolCallStatus::Success,
                result: Some("3 matches".into()),
            }],
            approval: None,
        };
        let message = Message::from_snapshot(snapshot);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].result.as_deref(), Some("3 matches"));
        assert_eq!(message.tool_calls[0].message_id.as_str(), "m9");
    }
}
