//! Socket abstraction the chat client is written against.
//!
//! A socket is created by a [`SocketFactory`] together with the four
//! [`SocketCallbacks`] it reports its lifecycle through. The client never
//! names a concrete transport, so tests can swap in an in-memory double.
//!
//! Callback contract, per socket:
//! - `on_open` at most once, before any message
//! - `on_message` zero or more times
//! - `on_error` when the transport fails, followed by `on_close`
//! - `on_close` at most once, last

mod websocket;

use std::sync::Arc;

use crate::error::ChatResult;

pub use self::websocket::TungsteniteSocketFactory;

/// Connection phase of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The minimal capability set of a socket.
pub trait Socket: Send + Sync {
    /// Queue a text frame. Fails if the socket is not open.
    fn send(&self, data: String) -> ChatResult<()>;

    /// Start an orderly close. Closing twice is a no-op.
    fn close(&self, code: u16, reason: &str);

    fn ready_state(&self) -> ReadyState;
}

type Callback<Args> = Box<dyn Fn(Args) + Send + Sync>;

/// Lifecycle callbacks handed to a socket at construction.
pub struct SocketCallbacks {
    pub on_open: Callback<()>,
    /// Close code and reason.
    pub on_close: Callback<(u16, String)>,
    /// Text payload of an incoming frame.
    pub on_message: Callback<String>,
    /// Human-readable error description.
    pub on_error: Callback<String>,
}

impl SocketCallbacks {
    pub fn open(&self) {
        (self.on_open)(())
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        (self.on_close)((code, reason.into()))
    }

    pub fn message(&self, data: impl Into<String>) {
        (self.on_message)(data.into())
    }

    pub fn error(&self, message: impl Into<String>) {
        (self.on_error)(message.into())
    }
}

/// Creates sockets for a URL.
pub trait SocketFactory: Send + Sync {
    fn create(&self, url: &str, callbacks: SocketCallbacks) -> ChatResult<Arc<dyn Socket>>;
}
