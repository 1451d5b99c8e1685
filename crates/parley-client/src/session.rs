//! Session-level facade: one driver plus its collaborators.
//!
//! Owns the countdown tasks for pending approvals and the two narrow
//! command paths (approve, reject) that are allowed to touch approval
//! state from outside the assembler. Decisions go to the server first;
//! local state changes only on acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parley_protocol::{
    ApprovalDecision, ApprovalId, ApprovalPort, ApprovalStatus, HistoryPort, ProtocolError,
    ProtocolResult, SessionId, TurnTransport,
};
use parley_transcript::{ApprovalTracker, Transcript};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::countdown::ApprovalCountdown;
use crate::driver::{CloseReason, TurnDriver};

pub struct SessionClient {
    driver: Arc<TurnDriver>,
    transport: Arc<dyn TurnTransport>,
    history: Arc<dyn HistoryPort>,
    approvals: Arc<dyn ApprovalPort>,
    countdowns: Mutex<HashMap<ApprovalId, ApprovalCountdown>>,
    countdown_tick: Duration,
}

impl SessionClient {
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn TurnTransport>,
        history: Arc<dyn HistoryPort>,
        approvals: Arc<dyn ApprovalPort>,
    ) -> Self {
        Self {
            driver: Arc::new(TurnDriver::new(session_id)),
            transport,
            history,
            approvals,
            countdowns: Mutex::new(HashMap::new()),
            countdown_tick: Duration::from_secs(1),
        }
    }

    /// Shorten the countdown tick (tests).
    pub fn with_countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick;
        self
    }

    pub fn driver(&self) -> &Arc<TurnDriver> {
        &self.driver
    }

    pub fn transcript(&self) -> Transcript {
        self.driver.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.driver.subscribe()
    }

    /// Load server history into the transcript. Called on session (re)open;
    /// the server copy wins over anything optimistic.
    #[instrument(skip(self))]
    pub async fn open(&self) -> ProtocolResult<()> {
        let session_id = self.driver.with_transcript(|t| t.session_id().clone());
        let history = self.history.fetch_messages(&session_id).await?;
        info!(messages = history.len(), "session history loaded");
        self.driver.hydrate(history);
        self.sync_countdowns();
        Ok(())
    }

    /// Submit one user turn and drive it to completion. Countdowns start
    /// only after a clean close; cancelled and failed turns leave none.
    pub async fn send(&self, content: &str) -> ProtocolResult<CloseReason> {
        let result = self.driver.submit(self.transport.as_ref(), content).await;
        if matches!(result, Ok(CloseReason::Done)) {
            self.sync_countdowns();
        }
        result
    }

    /// Cancel the in-flight turn, if any, and stop all countdowns.
    pub fn cancel(&self) -> bool {
        let cancelled = self.driver.cancel();
        if cancelled {
            self.countdowns.lock().clear();
        }
        cancelled
    }

    pub async fn approve(&self, id: &ApprovalId) -> ProtocolResult<()> {
        self.decide(id, ApprovalDecision::Approved).await
    }

    pub async fn reject(&self, id: &ApprovalId) -> ProtocolResult<()> {
        self.decide(id, ApprovalDecision::Rejected).await
    }

    /// Remaining time on an approval's countdown, if one is running.
    pub fn countdown_remaining(&self, id: &ApprovalId) -> Option<Duration> {
        self.countdowns
            .lock()
            .get(id)
            .map(ApprovalCountdown::remaining)
    }

    /// Reconcile countdown tasks with the transcript: start one per newly
    /// pending approval, drop the ones whose approval left `Pending`.
    /// Callers invoke this from their revision-watch loop.
    pub fn sync_countdowns(&self) {
        let pending: Vec<_> = self.driver.with_transcript(|t| {
            ApprovalTracker::new(t)
                .pending()
                .map(|approval| (approval.id.clone(), approval.expires_at))
                .collect()
        });

        let mut countdowns = self.countdowns.lock();
        let pending_ids: Vec<&ApprovalId> = pending.iter().map(|(id, _)| id).collect();
        countdowns.retain(|id, countdown| {
            pending_ids.contains(&id) && !countdown.is_finished()
        });
        for (id, expires_at) in pending {
            countdowns.entry(id.clone()).or_insert_with(|| {
                ApprovalCountdown::spawn_with_tick(
                    self.driver.clone(),
                    id,
                    expires_at,
                    self.countdown_tick,
                )
            });
        }
    }

    async fn decide(&self, id: &ApprovalId, decision: ApprovalDecision) -> ProtocolResult<()> {
        let status = self
            .driver
            .with_transcript(|t| t.find_approval(id).map(|approval| approval.status));
        match status {
            None => Err(ProtocolError::UnknownReference {
                entity: "approval",
                id: id.to_string(),
            }),
            Some(ApprovalStatus::Approved | ApprovalStatus::Rejected) => {
                Err(ProtocolError::InvalidState(format!(
                    "approval {id} is already resolved"
                )))
            }
            // A locally-expired approval is still forwarded; the server's
            // clock is the one that counts.
            Some(ApprovalStatus::Pending | ApprovalStatus::Expired) => {
                if let Err(err) = self.approvals.submit_decision(id, decision).await {
                    warn!(approval_id = %id, error = %err, "approval decision refused");
                    return Err(err);
                }
                self.driver.resolve_approval(id, decision.as_status());
                self.countdowns.lock().remove(id);
                info!(approval_id = %id, ?decision, "approval resolved");
                Ok(())
            }
        }
    }
}
