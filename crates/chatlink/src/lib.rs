//! Chatlink client library
//!
//! This library provides the real-time transport for a streaming chat backend:
//! a reconnecting WebSocket client, the listener registry it dispatches frames
//! through, and the session management the transport is bound to.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Consumer (terminal UI, tests)                               │
//! │  - on()/off() listeners, send_message(), connect()           │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────▼───────────────────────────────┐
//! │  ChatClient                                                  │
//! │  - connection state machine, pending messages                │
//! │  - ReconnectPolicy (exponential backoff)                     │
//! │  - EventEmitter (frames dispatched by `type`)                │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ SocketFactory / SocketCallbacks
//! ┌──────────────────────────────▼───────────────────────────────┐
//! │  TungsteniteSocketFactory (production) or a test double      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod emitter;
pub mod error;
pub mod session;
pub mod socket;

pub use client::{ChatClient, ConnectionState, ReconnectPolicy};
pub use config::{ApiConfig, ChatClientConfig};
pub use emitter::{EventEmitter, Listener, listener};
pub use error::{ChatError, ChatResult};
pub use socket::{ReadyState, Socket, SocketCallbacks, SocketFactory, TungsteniteSocketFactory};
