//! # parley-client — Streaming conversation client core
//!
//! Drives one turn at a time against a parley backend: submits the user's
//! text, folds the newline-delimited event stream into the transcript via
//! `parley-transcript`, runs expiry countdowns for pending approvals, and
//! forwards approve/reject decisions (server-first, local on ack).
//!
//! ## Module Overview
//!
//! - [`driver`] — Turn lifecycle state machine ([`driver::TurnDriver`])
//! - [`session`] — Session facade wiring driver, ports, and countdowns
//! - [`countdown`] — Per-approval expiry tasks
//! - [`http`] — reqwest implementations of the collaborator ports

pub mod countdown;
pub mod driver;
pub mod http;
pub mod session;

#[cfg(test)]
mod testing;

pub use countdown::ApprovalCountdown;
pub use driver::{CloseReason, TurnDriver, TurnState};
pub use http::HttpBackend;
pub use session::SessionClient;
