//! Read-only progress views over a transcript.
//!
//! Renderers poll these instead of walking the message tree themselves:
//! which tools are still running, which approvals still await a decision,
//! and when the next approval deadline falls.

use crate::message::{ApprovalRequest, ToolCall};
use crate::store::Transcript;
use chrono::{DateTime, Utc};
use parley_protocol::{ApprovalId, ApprovalStatus};

/// In-flight tool activity for one transcript.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallTracker<'a> {
    transcript: &'a Transcript,
}

impl<'a> ToolCallTracker<'a> {
    pub fn new(transcript: &'a Transcript) -> Self {
        Self { transcript }
    }

    /// Calls announced but not yet resolved, in transcript order.
    pub fn running(&self) -> impl Iterator<Item = &'a ToolCall> {
        self.transcript
            .messages()
            .flat_map(|message| message.tool_calls.iter())
            .filter(|call| !call.is_terminal())
    }

    pub fn running_count(&self) -> usize {
        self.running().count()
    }

    /// Whether every announced call has reached a terminal state.
    pub fn all_settled(&self) -> bool {
        self.running().next().is_none()
    }
}

/// Consent gates for one transcript.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalTracker<'a> {
    transcript: &'a Transcript,
}

impl<'a> ApprovalTracker<'a> {
    pub fn new(transcript: &'a Transcript) -> Self {
        Self { transcript }
    }

    /// Approvals still awaiting a decision, in transcript order.
    pub fn pending(&self) -> impl Iterator<Item = &'a ApprovalRequest> {
        self.transcript
            .messages()
            .filter_map(|message| message.approval.as_ref())
            .filter(|approval| approval.status == ApprovalStatus::Pending)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// The soonest pending deadline, if any approval is still open.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending().map(|approval| approval.expires_at).min()
    }

    /// Flip every overdue pending approval to locally `Expired` and report
    /// which ones moved. The server may still override these later.
    pub fn expire_overdue(transcript: &mut Transcript, now: DateTime<Utc>) -> Vec<ApprovalId> {
        let ids: Vec<ApprovalId> = ApprovalTracker::new(transcript)
            .pending()
            .filter(|approval| now >= approval.expires_at)
            .map(|approval| approval.id.clone())
            .collect();
        for id in &ids {
            if let Some(approval) = transcript.find_approval_mut(id) {
                approval.mark_expired(now);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::Duration;
    use parley_protocol::{
        ApprovalPayload, MessageId, RiskLevel, SessionId, ToolCallId, ToolCallPayload,
        ToolCallStatus, ToolCategory,
    };
    use serde_json::json;

    fn transcript_with_open_message(id: &str) -> Transcript {
        let mut transcript = Transcript::new(SessionId::from_string("s1"));
        transcript.insert(Message::assistant_open(
            MessageId::from_string(id),
            SessionId::from_string("s1"),
            None,
        ));
        transcript
    }

    fn call_payload(id: &str, status: ToolCallStatus) -> ToolCallPayload {
        ToolCallPayload {
            id: ToolCallId::from_string(id),
            name: "file_search".into(),
            category: ToolCategory::File,
            risk_level: RiskLevel::Low,
            is_local: true,
            params: json!({}),
            status,
            result: None,
        }
    }

    fn approval_payload(id: &str, expires_in: Duration) -> ApprovalPayload {
        ApprovalPayload {
            id: ApprovalId::from_string(id),
            tool_name: "shell_exec".into(),
            reason: "risky".into(),
            risk_level: RiskLevel::High,
            policy_source: "workspace-policy".into(),
            params: json!({}),
            expires_at: Utc::now() + expires_in,
            status: ApprovalStatus::Pending,
        }
    }

    #[test]
    fn running_tracks_only_unsettled_calls() {
        let mut transcript = transcript_with_open_message("m1");
        let message = transcript.get_mut(&MessageId::from_string("m1")).unwrap();
        message.tool_calls.push(crate::message::ToolCall::from_payload(
            MessageId::from_string("m1"),
            call_payload("tc1", ToolCallStatus::Running),
        ));
        message.tool_calls.push(crate::message::ToolCall::from_payload(
            MessageId::from_string("m1"),
            call_payload("tc2", ToolCallStatus::Success),
        ));

        let tracker = ToolCallTracker::new(&transcript);
        assert_eq!(tracker.running_count(), 1);
        assert!(!tracker.all_settled());

        transcript
            .find_tool_call_mut(&ToolCallId::from_string("tc1"))
            .unwrap()
            .resolve(ToolCallStatus::Success, "ok");
        assert!(ToolCallTracker::new(&transcript).all_settled());
    }

    #[test]
    fn next_deadline_picks_the_soonest_pending_approval() {
        let mut transcript = transcript_with_open_message("m1");
        transcript.insert(Message::assistant_open(
            MessageId::from_string("m2"),
            SessionId::from_string("s1"),
            None,
        ));
        let soon = Utc::now() + Duration::seconds(30);
        transcript
            .get_mut(&MessageId::from_string("m1"))
            .unwrap()
            .approval = Some(crate::message::ApprovalRequest::from_payload(
            MessageId::from_string("m1"),
            approval_payload("ap1", Duration::seconds(300)),
        ));
        let mut short = crate::message::ApprovalRequest::from_payload(
            MessageId::from_string("m2"),
            approval_payload("ap2", Duration::seconds(30)),
        );
        short.expires_at = soon;
        transcript.get_mut(&MessageId::from_string("m2")).unwrap().approval = Some(short);

        let tracker = ApprovalTracker::new(&transcript);
        assert_eq!(tracker.pending_count(), 2);
        assert_eq!(tracker.next_deadline(), Some(soon));
    }

    #[test]
    fn expire_overdue_flips_only_past_deadlines() {
        let mut transcript = transcript_with_open_message("m1");
        transcript
            .get_mut(&MessageId::from_string("m1"))
            .unwrap()
            .approval = Some(crate::message::ApprovalRequest::from_payload(
            MessageId::from_string("m1"),
            approval_payload("ap1", Duration::seconds(-5)),
        ));

        let expired = ApprovalTracker::expire_overdue(&mut transcript, Utc::now());
        assert_eq!(expired, vec![ApprovalId::from_string("ap1")]);
        assert_eq!(
            transcript
                .find_approval(&ApprovalId::from_string("ap1"))
                .unwrap()
                .status,
            ApprovalStatus::Expired
        );
        assert_eq!(ApprovalTracker::new(&transcript).pending_count(), 0);
    }
}
