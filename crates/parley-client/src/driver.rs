//! The turn driver: owns the streaming connection lifecycle for one
//! session and feeds decoded events to the assembler.
//!
//! One turn at a time. `submit` runs the whole turn to completion on the
//! caller's task; observers watch the revision channel and read transcript
//! snapshots between bumps. The transcript mutex is only ever held for
//! synchronous folds, never across an await.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use parley_protocol::{
    ApprovalId, ApprovalStatus, FrameDecoder, MessageSnapshot, ProtocolError, ProtocolResult,
    SessionId, StreamEvent, TurnTransport,
};
use parley_transcript::{Assembler, Transcript};
use tokio::sync::{Notify, watch};
use tracing::{info, instrument, warn};

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server sent `done`.
    Done,
    /// The server sent `error`, the connection dropped, or a frame failed
    /// to decode.
    Failed,
    /// The user cancelled locally.
    Cancelled,
}

/// Driver lifecycle. `Closed` is re-entrant: a new `submit` starts the
/// next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Connecting,
    Streaming,
    Closed(CloseReason),
}

impl TurnState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Closed(_) => "closed",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

struct TurnCore {
    state: TurnState,
    transcript: Transcript,
    assembler: Assembler,
    cancel: Option<Arc<Notify>>,
}

/// Drives turns for one session.
pub struct TurnDriver {
    core: Mutex<TurnCore>,
    revision: watch::Sender<u64>,
}

impl TurnDriver {
    pub fn new(session_id: SessionId) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            core: Mutex::new(TurnCore {
                state: TurnState::Idle,
                transcript: Transcript::new(session_id),
                assembler: Assembler::new(),
                cancel: None,
            }),
            revision,
        }
    }

    pub fn state(&self) -> TurnState {
        self.core.lock().state
    }

    /// Bumped after every transcript or state change; receivers re-read a
    /// snapshot when it moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> Transcript {
        self.core.lock().transcript.clone()
    }

    pub fn with_transcript<R>(&self, f: impl FnOnce(&Transcript) -> R) -> R {
        f(&self.core.lock().transcript)
    }

    /// Merge server history into the transcript (server wins on conflict).
    pub fn hydrate(&self, history: Vec<MessageSnapshot>) {
        self.core.lock().transcript.hydrate(history);
        self.bump();
    }

    /// Request cancellation of the in-flight turn. Returns whether a turn
    /// was active to cancel. Takes effect at the next event boundary.
    pub fn cancel(&self) -> bool {
        let cancel = self.core.lock().cancel.clone();
        match cancel {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Apply a server-acknowledged approval decision. Returns whether the
    /// local status changed.
    pub fn resolve_approval(&self, id: &ApprovalId, status: ApprovalStatus) -> bool {
        let changed = {
            let mut core = self.core.lock();
            core.transcript
                .find_approval_mut(id)
                .is_some_and(|approval| approval.resolve(status))
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Flip an overdue pending approval to locally `Expired`. The server
    /// may still override via `resolve_approval`.
    pub fn expire_approval(&self, id: &ApprovalId) -> bool {
        let changed = {
            let mut core = self.core.lock();
            core.transcript
                .find_approval_mut(id)
                .is_some_and(|approval| approval.mark_expired(chrono::Utc::now()))
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Run one full turn: optimistic user insert, connect, fold the frame
    /// stream, close. Errors on the wire finalize any open message before
    /// they propagate.
    #[instrument(skip_all)]
    pub async fn submit(
        &self,
        transport: &dyn TurnTransport,
        content: &str,
    ) -> ProtocolResult<CloseReason> {
        let (cancel, session_id) = {
            let mut core = self.core.lock();
            if core.state.is_active() {
                return Err(ProtocolError::InvalidState(format!(
                    "a turn is already {}",
                    core.state.label()
                )));
            }
            core.state = TurnState::Connecting;
            core.assembler = Assembler::new();
            core.transcript.push_user(content);
            let cancel = Arc::new(Notify::new());
            core.cancel = Some(cancel.clone());
            (cancel, core.transcript.session_id().clone())
        };
        self.bump();

        let mut stream = match transport.open_turn(&session_id, content).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "turn connection failed");
                self.close(CloseReason::Failed, Some("connection failed"));
                return Err(err);
            }
        };

        {
            self.core.lock().state = TurnState::Streaming;
        }
        self.bump();
        info!("turn streaming");

        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.notified() => {
                    info!("turn cancelled");
                    self.close(CloseReason::Cancelled, Some("cancelled"));
                    return Ok(CloseReason::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let events = match decoder.push(&bytes) {
                        Ok(events) => events,
                        Err(err) => {
                            warn!(error = %err, "frame decode failed, dropping turn");
                            self.close(CloseReason::Failed, Some("malformed frame"));
                            return Err(err);
                        }
                    };
                    if let Some(reason) = self.fold(events) {
                        self.close(reason, None);
                        return Ok(reason);
                    }
                    self.bump();
                }
                Some(Err(err)) => {
                    warn!(error = %err, "turn connection lost");
                    self.close(CloseReason::Failed, Some("connection lost"));
                    return Err(err);
                }
                None => {
                    warn!("stream ended before terminal event");
                    self.close(CloseReason::Failed, Some("connection closed early"));
                    return Err(ProtocolError::Connection(
                        "stream ended before terminal event".into(),
                    ));
                }
            }
        }
    }

    /// Fold a batch of events; returns the close reason once a terminal
    /// event lands.
    fn fold(&self, events: Vec<StreamEvent>) -> Option<CloseReason> {
        let mut core = self.core.lock();
        let mut reason = None;
        for event in events {
            let terminal = match &event {
                StreamEvent::Done => Some(CloseReason::Done),
                StreamEvent::Error { .. } => Some(CloseReason::Failed),
                _ => None,
            };
            let TurnCore {
                transcript,
                assembler,
                ..
            } = &mut *core;
            if assembler.apply(transcript, event).is_applied() {
                if let Some(terminal) = terminal {
                    reason = Some(terminal);
                }
            }
        }
        reason
    }

    /// Transition to `Closed`, finalizing open messages when the close was
    /// not a clean `done` (the assembler already handled server `error`).
    fn close(&self, reason: CloseReason, marker: Option<&str>) {
        {
            let mut core = self.core.lock();
            if let Some(marker) = marker {
                let TurnCore {
                    transcript,
                    assembler,
                    ..
                } = &mut *core;
                assembler.abort(transcript, marker);
            }
            core.state = TurnState::Closed(reason);
            core.cancel = None;
        }
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
