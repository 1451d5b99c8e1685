//! Collaborator contracts consumed by the streaming core.
//!
//! Session persistence, history, and approval submission are owned by
//! excluded subsystems; these traits pin down exactly the request/response
//! shapes the core needs from them. The HTTP implementations live in
//! `parley-client`; tests substitute scripted in-memory ones.

use crate::error::ProtocolResult;
use crate::event::{ApprovalPayload, ApprovalStatus, ToolCallPayload};
use crate::ids::{AgentId, ApprovalId, MessageId, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Raw byte chunks of one turn's response body, in send order.
pub type TurnByteStream = BoxStream<'static, ProtocolResult<Vec<u8>>>;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorKind {
    User,
    Assistant,
    System,
}

/// Message lifecycle. `Streaming` is the only phase in which text may still
/// change; a `user` message never streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Streaming,
    Sent,
    Error,
}

/// A finalized message as returned by the history collaborator.
///
/// History never contains in-flight entries, but nested tool calls and the
/// approval request keep their own (possibly non-terminal) statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub session_id: SessionId,
    pub author: AuthorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalPayload>,
}

/// Outcome of a human approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    /// The approval status this decision resolves to when the server
    /// acknowledges it.
    pub fn as_status(self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Opens one streaming connection per submitted turn.
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// `POST` the user's text; the returned stream is the ordered frame
    /// sequence for this turn. Suspends until the connection is established.
    async fn open_turn(&self, session_id: &SessionId, content: &str)
    -> ProtocolResult<TurnByteStream>;
}

/// Fetches finalized messages on session (re)open.
#[async_trait]
pub trait HistoryPort: Send + Sync {
    async fn fetch_messages(&self, session_id: &SessionId)
    -> ProtocolResult<Vec<MessageSnapshot>>;
}

/// Forwards human approval decisions to the backend.
///
/// The server is authoritative: a decision may be refused (already
/// resolved, expired) and the caller must leave local state unchanged
/// until the server's own event arrives.
#[async_trait]
pub trait ApprovalPort: Send + Sync {
    async fn submit_decision(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> ProtocolResult<()>;
}
