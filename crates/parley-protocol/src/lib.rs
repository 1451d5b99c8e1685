//! # parley-protocol — Streaming conversation protocol contract
//!
//! Defines the wire-level event vocabulary exchanged over one streaming
//! connection per user turn, plus the typed IDs, frame codec, error
//! taxonomy, and collaborator trait boundaries the client core builds on.
//!
//! Intentionally dependency-light (no tokio, no HTTP) so it can serve as a
//! pure contract crate for both the client and the simulation backend.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed ID wrappers (SessionId, MessageId, ToolCallId, ...)
//! - [`event`] — The closed nine-variant [`event::StreamEvent`] union
//! - [`frame`] — Incremental newline-delimited JSON frame decoding
//! - [`ports`] — Collaborator contracts (transport, history, approvals)
//! - [`error`] — ProtocolError / ProtocolResult

pub mod error;
pub mod event;
pub mod frame;
pub mod ids;
pub mod ports;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{
    ApprovalPayload, ApprovalStatus, RiskLevel, StreamEvent, ToolCallPayload, ToolCallStatus,
    ToolCategory, ToolResultStatus,
};
pub use frame::{FrameDecoder, encode_frame};
pub use ids::{AgentId, ApprovalId, MessageId, SessionId, ToolCallId};
pub use ports::{
    ApprovalDecision, ApprovalPort, AuthorKind, HistoryPort, MessageSnapshot, MessageStatus,
    TurnByteStream, TurnTransport,
};
