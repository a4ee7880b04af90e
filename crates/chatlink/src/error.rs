//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that can occur on the chat transport.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The socket reported an error before it opened.
    #[error("connection failed")]
    ConnectionFailed,

    /// A send was attempted without an open socket.
    #[error("WebSocket이 연결되지 않았습니다.")]
    NotConnected,

    /// The socket factory or the socket itself failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// A listener returned an error and aborted the dispatch.
    #[error("listener for '{event}' failed: {source}")]
    Listener {
        event: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An outbound frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}
