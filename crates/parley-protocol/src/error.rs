//! Error taxonomy for the streaming conversation protocol.

use thiserror::Error;

/// Everything that can go wrong between submitting a turn and folding its
/// final frame.
///
/// `Decode` aborts the connection (previously-applied transcript state is
/// preserved). `UnknownReference` is recoverable: the offending event is
/// dropped and the transcript stays intact. `Cancelled` mirrors
/// `Connection` in its effect on open messages but does not imply failure
/// to the user.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(String),
    #[error("event references unknown {entity} id {id}")]
    UnknownReference { entity: &'static str, id: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("turn cancelled")]
    Cancelled,
    #[error("approval decision rejected by server: {0}")]
    ApprovalDecision(String),
    #[error("invalid turn state: {0}")]
    InvalidState(String),
}

/// Convenience result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
