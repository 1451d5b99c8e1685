//! Typed ID wrappers for the conversation protocol.
//!
//! IDs are opaque String newtypes (serde-transparent). The backend mints
//! short human-readable ids ("m1", "tc1") in development and UUIDs in
//! production; the client never inspects the contents, it only matches
//! them by equality.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id received on the wire.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Mint a fresh random id (UUID v4).
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::random()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier for a conversation session.
    SessionId
);
typed_id!(
    /// Unique identifier for one transcript entry.
    MessageId
);
typed_id!(
    /// Unique identifier for a tool invocation nested under a message.
    ToolCallId
);
typed_id!(
    /// Unique identifier for a risk-gated approval request.
    ApprovalId
);
typed_id!(
    /// Unique identifier for a specialized agent.
    AgentId
);
