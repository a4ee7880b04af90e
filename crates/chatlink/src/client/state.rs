//! Connection state of a chat client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the transport as seen by the UI.
///
/// ```text
///            connect()            open
///   Idle ─────────────► Connecting ─────► Idle ◄──────────────┐
///     ▲                    │                │ send_message()   │ stream_end /
///     │ disconnect()       │ error          ▼                  │ stream_error
///     └──────────────── Error          Streaming ──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Streaming).unwrap();
        assert_eq!(json, "\"streaming\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
