//! Transcript data model and message-assembly reducer.
//!
//! This crate owns the client-side shape of a conversation: the ordered
//! [`Transcript`] of [`Message`]s with their nested tool calls and
//! approval requests, and the [`Assembler`] that folds wire events into
//! it in arrival order. Everything here is pure state: no sockets, no
//! timers, no I/O. The `parley-client` crate drives it.

pub mod assembler;
pub mod message;
pub mod session;
pub mod store;
pub mod tracker;

pub use assembler::{ApplyOutcome, Assembler, Discard};
pub use message::{AgentContext, ApprovalRequest, Message, ToolCall};
pub use session::{Session, SessionStatus};
pub use store::Transcript;
pub use tracker::{ApprovalTracker, ToolCallTracker};
