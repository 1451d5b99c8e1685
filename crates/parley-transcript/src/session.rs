//! Session metadata: the conversation container.
//!
//! Created by the user, never mutated by the protocol itself except the
//! derived counters (message count, last-message time).

use chrono::{DateTime, Utc};
use parley_protocol::SessionId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub status: SessionStatus,
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: SessionId::random(),
            title: title.into(),
            workspace_id: None,
            status: SessionStatus::Active,
            message_count: 0,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn archive(&mut self) {
        self.status = SessionStatus::Archived;
    }

    /// Derived-counter side effect of a turn.
    pub fn note_message(&mut self, at: DateTime<Utc>) {
        self.message_count += 1;
        self.last_message_at = Some(self.last_message_at.map_or(at, |prev| prev.max(at)));
    }
}
