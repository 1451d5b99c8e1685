//! The ordered, de-duplicated message collection for one session.
//!
//! The store exclusively owns every Message / ToolCall / ApprovalRequest
//! for its session. The assembler is the only writer; renderers and the
//! approve/reject actions are read-only observers plus two narrow command
//! entry points in `parley-client`.

use crate::message::Message;
use chrono::Duration;
use indexmap::IndexMap;
use parley_protocol::{
    ApprovalId, AuthorKind, MessageId, MessageSnapshot, SessionId, ToolCallId,
};
use tracing::debug;

use crate::message::{ApprovalRequest, ToolCall};

/// Optimistic user messages with no id match in server history are dropped
/// when a server copy matches on content within this window.
const RECONCILE_WINDOW_SECS: i64 = 30;

/// Ordered transcript for one session. Process memory only; rehydrated
/// from the history fetch on session (re)open.
#[derive(Debug, Clone)]
pub struct Transcript {
    session_id: SessionId,
    messages: IndexMap<MessageId, Message>,
}

impl Transcript {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            messages: IndexMap::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.get_mut(id)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.values().last()
    }

    /// Insert a message, keyed and de-duplicated by id. Returns whether it
    /// was new.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.messages.contains_key(&message.id) {
            return false;
        }
        self.messages.insert(message.id.clone(), message);
        true
    }

    /// Synthesize the user's own message before any server bytes arrive.
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        let message = Message::user(self.session_id.clone(), content);
        let id = message.id.clone();
        self.messages.insert(id.clone(), message);
        id
    }

    pub fn find_tool_call(&self, id: &ToolCallId) -> Option<&ToolCall> {
        self.messages.values().find_map(|message| message.tool_call(id))
    }

    pub fn find_tool_call_mut(&mut self, id: &ToolCallId) -> Option<&mut ToolCall> {
        self.messages
            .values_mut()
            .find_map(|message| message.tool_call_mut(id))
    }

    pub fn find_approval(&self, id: &ApprovalId) -> Option<&ApprovalRequest> {
        self.messages
            .values()
            .filter_map(|message| message.approval.as_ref())
            .find(|approval| &approval.id == id)
    }

    pub fn find_approval_mut(&mut self, id: &ApprovalId) -> Option<&mut ApprovalRequest> {
        self.messages
            .values_mut()
            .filter_map(|message| message.approval.as_mut())
            .find(|approval| &approval.id == id)
    }

    /// Messages whose text is still mutable.
    pub fn open_messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages
            .values_mut()
            .filter(|message| message.is_open())
    }

    /// Replace local state with server history, which is the merge
    /// authority. Local messages survive only if the server does not know
    /// them: an id match defers to the server copy, and an optimistic user
    /// message with no id match is dropped when a server user message
    /// carries the same content within a short creation-time window.
    pub fn hydrate(&mut self, history: Vec<MessageSnapshot>) {
        let mut merged: IndexMap<MessageId, Message> = history
            .into_iter()
            .map(Message::from_snapshot)
            .map(|message| (message.id.clone(), message))
            .collect();

        let local = std::mem::take(&mut self.messages);
        for (id, message) in local {
            if merged.contains_key(&id) {
                continue;
            }
            if message.author == AuthorKind::User && Self::has_optimistic_twin(&merged, &message) {
                debug!(message_id = %id, "dropping optimistic duplicate during hydration");
                continue;
            }
            merged.insert(id, message);
        }
        self.messages = merged;
    }

    fn has_optimistic_twin(merged: &IndexMap<MessageId, Message>, local: &Message) -> bool {
        let window = Duration::seconds(RECONCILE_WINDOW_SECS);
        merged.values().any(|server| {
            server.author == AuthorKind::User
                && server.content == local.content
                && (server.created_at - local.created_at).abs() <= window
        })
    }
}
