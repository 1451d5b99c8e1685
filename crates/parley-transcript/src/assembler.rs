//! The message-assembly reducer.
//!
//! Folds stream events into the transcript in arrival order. The reducer
//! never reorders, never buffers-and-sorts, and never panics on a
//! malformed reference: an event naming an id that was never opened is
//! dropped with a recoverable warning so one bad frame cannot abort an
//! otherwise-healthy transcript. Structurally invalid frames never reach
//! this layer; the frame decoder rejects them first.

use crate::message::{AgentContext, ApprovalRequest, Message, ToolCall};
use crate::store::Transcript;
use parley_protocol::{MessageId, StreamEvent, ToolCallId};
use tracing::{debug, warn};

/// Why an event was dropped instead of applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// Mutation event referencing a message id that was never opened.
    UnknownMessage(MessageId),
    /// Mutation event targeting a message whose text is already finalized.
    MessageNotOpen(MessageId),
    /// `message-start` for an id that already exists.
    DuplicateMessage(MessageId),
    /// `tool-call` re-announcing an existing id.
    DuplicateToolCall(ToolCallId),
    /// `tool-result` referencing a tool call that was never announced.
    UnknownToolCall(ToolCallId),
    /// `tool-result` for a call already in a terminal state (first result
    /// wins; the repeat is a no-op).
    ToolCallAlreadyTerminal(ToolCallId),
    /// `approval-request` on a message that already carries one.
    DuplicateApproval(MessageId),
    /// Any event arriving after `done`/`error` closed the stream.
    StreamClosed,
}

/// Result of folding one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Discarded(Discard),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    Open,
    Closed,
}

/// Per-turn reducer state: the fold-local "current agent" context and the
/// open/closed phase of the stream. One assembler instance per connection;
/// stores for different sessions never share one.
#[derive(Debug)]
pub struct Assembler {
    current_agent: Option<AgentContext>,
    phase: StreamPhase,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            current_agent: None,
            phase: StreamPhase::Open,
        }
    }

    /// Whether `done` or `error` has been folded.
    pub fn is_closed(&self) -> bool {
        self.phase == StreamPhase::Closed
    }

    /// The agent that will be attributed to the next `message-start`.
    pub fn current_agent(&self) -> Option<&AgentContext> {
        self.current_agent.as_ref()
    }

    /// Fold one event into the transcript.
    pub fn apply(&mut self, transcript: &mut Transcript, event: StreamEvent) -> ApplyOutcome {
        if self.is_closed() {
            warn!(?event, "event after stream close discarded");
            return ApplyOutcome::Discarded(Discard::StreamClosed);
        }

        match event {
            StreamEvent::AgentSwitch {
                agent_id,
                agent_role,
                agent_name,
            } => {
                debug!(agent = %agent_name, role = %agent_role, "agent hand-off");
                self.current_agent = Some(AgentContext {
                    agent_id,
                    agent_role,
                    agent_name,
                });
                ApplyOutcome::Applied
            }

            StreamEvent::MessageStart {
                message_id,
                agent_id,
            } => {
                if transcript.contains(&message_id) {
                    warn!(message_id = %message_id, "duplicate message-start discarded");
                    return ApplyOutcome::Discarded(Discard::DuplicateMessage(message_id));
                }
                let mut message = Message::assistant_open(
                    message_id,
                    transcript.session_id().clone(),
                    self.current_agent.as_ref(),
                );
                if message.agent_id.is_none() {
                    message.agent_id = agent_id;
                }
                transcript.insert(message);
                ApplyOutcome::Applied
            }

            StreamEvent::TextDelta { message_id, delta } => {
                let Some(message) = transcript.get_mut(&message_id) else {
                    warn!(message_id = %message_id, "text-delta for unknown message discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownMessage(message_id));
                };
                if !message.is_open() {
                    warn!(message_id = %message_id, "text-delta after message-end discarded");
                    return ApplyOutcome::Discarded(Discard::MessageNotOpen(message_id));
                }
                message.append_delta(&delta);
                ApplyOutcome::Applied
            }

            StreamEvent::ToolCall {
                message_id,
                tool_call,
            } => {
                if transcript.find_tool_call(&tool_call.id).is_some() {
                    warn!(tool_call_id = %tool_call.id, "duplicate tool-call discarded");
                    return ApplyOutcome::Discarded(Discard::DuplicateToolCall(tool_call.id));
                }
                let Some(message) = transcript.get_mut(&message_id) else {
                    warn!(message_id = %message_id, "tool-call for unknown message discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownMessage(message_id));
                };
                if !message.is_open() {
                    warn!(message_id = %message_id, "tool-call after message-end discarded");
                    return ApplyOutcome::Discarded(Discard::MessageNotOpen(message_id));
                }
                message
                    .tool_calls
                    .push(ToolCall::from_payload(message_id, tool_call));
                ApplyOutcome::Applied
            }

            StreamEvent::ToolResult {
                message_id,
                tool_call_id,
                result,
                status,
            } => {
                let Some(message) = transcript.get_mut(&message_id) else {
                    warn!(message_id = %message_id, "tool-result for unknown message discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownMessage(message_id));
                };
                let Some(call) = message.tool_call_mut(&tool_call_id) else {
                    warn!(tool_call_id = %tool_call_id, "tool-result for unknown call discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownToolCall(tool_call_id));
                };
                if !call.resolve(status.into(), result) {
                    debug!(tool_call_id = %tool_call_id, "repeat tool-result ignored");
                    return ApplyOutcome::Discarded(Discard::ToolCallAlreadyTerminal(tool_call_id));
                }
                ApplyOutcome::Applied
            }

            StreamEvent::ApprovalRequest {
                message_id,
                approval,
            } => {
                let Some(message) = transcript.get_mut(&message_id) else {
                    warn!(message_id = %message_id, "approval-request for unknown message discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownMessage(message_id));
                };
                if message.approval.is_some() {
                    warn!(message_id = %message_id, "second approval-request discarded");
                    return ApplyOutcome::Discarded(Discard::DuplicateApproval(message_id));
                }
                message.approval = Some(ApprovalRequest::from_payload(message_id, approval));
                ApplyOutcome::Applied
            }

            StreamEvent::MessageEnd { message_id } => {
                let Some(message) = transcript.get_mut(&message_id) else {
                    warn!(message_id = %message_id, "message-end for unknown message discarded");
                    return ApplyOutcome::Discarded(Discard::UnknownMessage(message_id));
                };
                if !message.is_open() {
                    warn!(message_id = %message_id, "message-end for closed message discarded");
                    return ApplyOutcome::Discarded(Discard::MessageNotOpen(message_id));
                }
                message.finalize();
                ApplyOutcome::Applied
            }

            StreamEvent::Done => {
                self.phase = StreamPhase::Closed;
                ApplyOutcome::Applied
            }

            StreamEvent::Error { message } => {
                let failed = Self::fail_open_messages(transcript, &message);
                if failed > 0 {
                    warn!(count = failed, error = %message, "open messages finalized by stream error");
                }
                self.phase = StreamPhase::Closed;
                ApplyOutcome::Applied
            }
        }
    }

    /// Close the stream from the client side (cancellation or connection
    /// loss), finalizing any open message with the given marker. Applied
    /// transcript state is retained; there is no rollback.
    pub fn abort(&mut self, transcript: &mut Transcript, marker: &str) -> usize {
        self.phase = StreamPhase::Closed;
        Self::fail_open_messages(transcript, marker)
    }

    fn fail_open_messages(transcript: &mut Transcript, marker: &str) -> usize {
        let mut failed = 0;
        for message in transcript.open_messages_mut() {
            message.fail(marker);
            failed += 1;
        }
        failed
    }
}
