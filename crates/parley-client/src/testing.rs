//! Scripted in-memory collaborators for driver and session tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use parley_protocol::{
    ApprovalDecision, ApprovalId, ApprovalPort, HistoryPort, MessageSnapshot, ProtocolError,
    ProtocolResult, SessionId, StreamEvent, TurnByteStream, TurnTransport, encode_frame,
};
use tokio::sync::watch;

/// Encode events as one newline-delimited byte run.
pub fn encode_lines(events: &[StreamEvent]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for event in events {
        bytes.extend_from_slice(encode_frame(event).unwrap().as_bytes());
    }
    bytes
}

/// Replays a fixed chunk script, then ends the stream.
pub struct ScriptedTransport {
    chunks: Mutex<Option<Vec<Vec<u8>>>>,
    refuse: Option<String>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: Mutex::new(Some(chunks)),
            refuse: None,
        }
    }

    /// A transport whose connection attempt always fails.
    pub fn refusing(message: &str) -> Self {
        Self {
            chunks: Mutex::new(None),
            refuse: Some(message.to_owned()),
        }
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn open_turn(
        &self,
        _session_id: &SessionId,
        _content: &str,
    ) -> ProtocolResult<TurnByteStream> {
        if let Some(message) = &self.refuse {
            return Err(ProtocolError::Connection(message.clone()));
        }
        let chunks = self.chunks.lock().take().unwrap_or_default();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Optionally yields a prelude, then stays open forever. Lets tests hold a
/// turn mid-stream while they poke at the driver from outside.
pub struct StallingTransport {
    prelude: Vec<u8>,
    opened: watch::Sender<bool>,
}

impl StallingTransport {
    pub fn new() -> Self {
        Self::with_prelude(Vec::new())
    }

    pub fn with_prelude(prelude: Vec<u8>) -> Self {
        let (opened, _) = watch::channel(false);
        Self { prelude, opened }
    }

    /// Suspend until `open_turn` has been called.
    pub async fn connected(&self) {
        let mut rx = self.opened.subscribe();
        while !*rx.borrow_and_update() {
            rx.changed().await.unwrap();
        }
    }
}

#[async_trait]
impl TurnTransport for StallingTransport {
    async fn open_turn(
        &self,
        _session_id: &SessionId,
        _content: &str,
    ) -> ProtocolResult<TurnByteStream> {
        let head = if self.prelude.is_empty() {
            Vec::new()
        } else {
            vec![Ok(self.prelude.clone())]
        };
        self.opened.send_replace(true);
        Ok(stream::iter(head).chain(stream::pending()).boxed())
    }
}

/// Serves a fixed history snapshot list.
pub struct StaticHistory {
    pub snapshots: Vec<MessageSnapshot>,
}

#[async_trait]
impl HistoryPort for StaticHistory {
    async fn fetch_messages(
        &self,
        _session_id: &SessionId,
    ) -> ProtocolResult<Vec<MessageSnapshot>> {
        Ok(self.snapshots.clone())
    }
}

/// Records submitted decisions; optionally refuses every one.
pub struct RecordingApprovalPort {
    pub calls: Arc<Mutex<Vec<(ApprovalId, ApprovalDecision)>>>,
    refusal: Option<String>,
}

impl RecordingApprovalPort {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            refusal: None,
        }
    }

    pub fn refusing(message: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            refusal: Some(message.to_owned()),
        }
    }
}

#[async_trait]
impl ApprovalPort for RecordingApprovalPort {
    async fn submit_decision(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> ProtocolResult<()> {
        self.calls.lock().push((approval_id.clone(), decision));
        match &self.refusal {
            Some(message) => Err(ProtocolError::ApprovalDecision(message.clone())),
            None => Ok(()),
        }
    }
}
