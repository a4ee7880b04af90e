//! Session error types.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while managing sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or writing the session file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The chat API returned an error response.
    #[error("chat API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// No session is stored and none was given.
    #[error("no active session")]
    NoSession,
}
