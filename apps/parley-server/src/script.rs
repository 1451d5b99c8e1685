//! Turn scripting: the canned multi-agent responses the simulation backend
//! streams back for a submitted user message.
//!
//! A script is planned up front as the exact event sequence for one turn,
//! together with the finalized message snapshots the history endpoint will
//! serve afterwards. The handler streams the events with pacing; the
//! snapshots are persisted before the first byte goes out so a client that
//! reconnects mid-turn still sees a consistent history.

use chrono::{DateTime, Duration, Utc};
use parley_protocol::{
    AgentId, ApprovalId, ApprovalPayload, ApprovalStatus, AuthorKind, MessageId, MessageSnapshot,
    MessageStatus, RiskLevel, SessionId, StreamEvent, ToolCallId, ToolCallPayload, ToolCallStatus,
    ToolCategory,
};
use serde_json::json;

/// How long a scripted approval stays decidable.
pub const APPROVAL_TTL_SECS: i64 = 120;

const RISKY_KEYWORDS: [&str; 5] = ["deploy", "delete", "drop", "rm -", "shutdown"];
const SEARCH_KEYWORDS: [&str; 4] = ["search", "find", "look", "grep"];

/// One planned turn: the stream to send and the history it leaves behind.
#[derive(Debug)]
pub struct TurnScript {
    pub events: Vec<StreamEvent>,
    pub snapshots: Vec<MessageSnapshot>,
    pub approval: Option<PlannedApproval>,
}

/// Approval bookkeeping the decision endpoints need.
#[derive(Debug, Clone)]
pub struct PlannedApproval {
    pub id: ApprovalId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub expires_at: DateTime<Utc>,
}

struct Agent {
    id: &'static str,
    role: &'static str,
    name: &'static str,
}

const COORDINATOR: Agent = Agent {
    id: "agent-coordinator",
    role: "coordinator",
    name: "Coordinator",
};

const DEVELOPER: Agent = Agent {
    id: "agent-developer",
    role: "developer",
    name: "Developer",
};

impl Agent {
    fn switch(&self) -> StreamEvent {
        StreamEvent::AgentSwitch {
            agent_id: AgentId::from_string(self.id),
            agent_role: self.role.to_owned(),
            agent_name: self.name.to_owned(),
        }
    }
}

/// Plan the full response to one user submission.
pub fn plan_turn(session_id: &SessionId, content: &str, now: DateTime<Utc>) -> TurnScript {
    let lowered = content.to_lowercase();
    if RISKY_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        approval_turn(session_id, content, now)
    } else if SEARCH_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        tool_turn(session_id, content, now)
    } else {
        reply_turn(session_id, content, now)
    }
}

/// Coordinator acknowledges and answers in plain text.
fn reply_turn(session_id: &SessionId, content: &str, now: DateTime<Utc>) -> TurnScript {
    let message_id = MessageId::random();
    let text = format!(
        "收到。I will take care of \"{}\" and report back here.",
        content.trim()
    );

    let mut events = vec![
        COORDINATOR.switch(),
        StreamEvent::MessageStart {
            message_id: message_id.clone(),
            agent_id: Some(AgentId::from_string(COORDINATOR.id)),
        },
    ];
    events.extend(deltas(&message_id, &text));
    events.push(StreamEvent::MessageEnd {
        message_id: message_id.clone(),
    });
    events.push(StreamEvent::Done);

    TurnScript {
        events,
        snapshots: vec![assistant_snapshot(
            session_id, &message_id, &COORDINATOR, &text, now, vec![], None,
        )],
        approval: None,
    }
}

/// Developer runs a file search tool and reports the result.
fn tool_turn(session_id: &SessionId, content: &str, now: DateTime<Utc>) -> TurnScript {
    let message_id = MessageId::random();
    let tool_call_id = ToolCallId::random();
    let text = "Let me look through the workspace first.".to_owned();
    let result = "3 files matched".to_owned();

    let call = ToolCallPayload {
        id: tool_call_id.clone(),
        name: "file_search".to_owned(),
        category: ToolCategory::File,
        risk_level: RiskLevel::Low,
        is_local: true,
        params: json!({ "query": content.trim() }),
        status: ToolCallStatus::Running,
        result: None,
    };

    let mut events = vec![
        DEVELOPER.switch(),
        StreamEvent::MessageStart {
            message_id: message_id.clone(),
            agent_id: Some(AgentId::from_string(DEVELOPER.id)),
        },
    ];
    events.extend(deltas(&message_id, &text));
    events.push(StreamEvent::ToolCall {
        message_id: message_id.clone(),
        tool_call: call.clone(),
    });
    events.push(StreamEvent::ToolResult {
        message_id: message_id.clone(),
        tool_call_id,
        result: result.clone(),
        status: parley_protocol::ToolResultStatus::Success,
    });
    events.push(StreamEvent::MessageEnd {
        message_id: message_id.clone(),
    });
    events.push(StreamEvent::Done);

    let settled = ToolCallPayload {
        status: ToolCallStatus::Success,
        result: Some(result),
        ..call
    };
    TurnScript {
        events,
        snapshots: vec![assistant_snapshot(
            session_id,
            &message_id,
            &DEVELOPER,
            &text,
            now,
            vec![settled],
            None,
        )],
        approval: None,
    }
}

/// Coordinator stops at a consent gate for a risky operation.
fn approval_turn(session_id: &SessionId, content: &str, now: DateTime<Utc>) -> TurnScript {
    let message_id = MessageId::random();
    let approval_id = ApprovalId::random();
    let expires_at = now + Duration::seconds(APPROVAL_TTL_SECS);
    let text = "This operation needs your sign-off before I continue.".to_owned();

    let approval = ApprovalPayload {
        id: approval_id.clone(),
        tool_name: "shell_exec".to_owned(),
        reason: format!("requested operation looks destructive: {}", content.trim()),
        risk_level: RiskLevel::High,
        policy_source: "workspace-policy".to_owned(),
        params: json!({ "command": content.trim() }),
        expires_at,
        status: ApprovalStatus::Pending,
    };

    let mut events = vec![
        COORDINATOR.switch(),
        StreamEvent::MessageStart {
            message_id: message_id.clone(),
            agent_id: Some(AgentId::from_string(COORDINATOR.id)),
        },
    ];
    events.extend(deltas(&message_id, &text));
    events.push(StreamEvent::ApprovalRequest {
        message_id: message_id.clone(),
        approval: approval.clone(),
    });
    events.push(StreamEvent::MessageEnd {
        message_id: message_id.clone(),
    });
    events.push(StreamEvent::Done);

    TurnScript {
        events,
        snapshots: vec![assistant_snapshot(
            session_id,
            &message_id,
            &COORDINATOR,
            &text,
            now,
            vec![],
            Some(approval),
        )],
        approval: Some(PlannedApproval {
            id: approval_id,
            session_id: session_id.clone(),
            message_id,
            expires_at,
        }),
    }
}

/// Split reply text into small delta frames, respecting char boundaries.
fn deltas(message_id: &MessageId, text: &str) -> Vec<StreamEvent> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(6)
        .map(|chunk| StreamEvent::TextDelta {
            message_id: message_id.clone(),
            delta: chunk.iter().collect(),
        })
        .collect()
}

pub fn user_snapshot(session_id: &SessionId, content: &str, now: DateTime<Utc>) -> MessageSnapshot {
    MessageSnapshot {
        id: MessageId::random(),
        session_id: session_id.clone(),
        author: AuthorKind::User,
        agent_id: None,
        agent_role: None,
        agent_name: None,
        content: content.to_owned(),
        status: MessageStatus::Sent,
        created_at: now,
        tool_calls: vec![],
        approval: None,
    }
}

#[allow(clippy::too_many_arguments)]
fn assistant_snapshot(
    session_id: &SessionId,
    message_id: &MessageId,
    agent: &Agent,
    content: &str,
    now: DateTime<Utc>,
    tool_calls: Vec<ToolCallPayload>,
    approval: Option<ApprovalPayload>,
) -> MessageSnapshot {
    MessageSnapshot {
        id: message_id.clone(),
        session_id: session_id.clone(),
        author: AuthorKind::Assistant,
        agent_id: Some(AgentId::from_string(agent.id)),
        agent_role: Some(agent.role.to_owned()),
        agent_name: Some(agent.name.to_owned()),
        content: content.to_owned(),
        status: MessageStatus::Sent,
        created_at: now,
        tool_calls,
        approval,
    }
}
