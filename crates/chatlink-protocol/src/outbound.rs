//! Client -> server frames.

use serde::{Deserialize, Serialize};

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A user message to answer with a token stream.
    Message(ChatMessage),
}

/// A user message, correlated with its response stream by `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub session_id: String,
    pub message_id: String,
}

impl OutboundFrame {
    /// Build a message frame.
    pub fn message(
        content: impl Into<String>,
        session_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self::Message(ChatMessage {
            content: content.into(),
            session_id: session_id.into(),
            message_id: message_id.into(),
        })
    }
}
