//! Wire types for the chatlink streaming chat transport.
//!
//! ```text
//! Client --[WS: OutboundFrame]--> Chat backend
//! Client <--[WS: InboundFrame]--- Chat backend
//! Client <--[HTTP: api types]---- Chat backend (sessions, history)
//! ```
//!
//! Every WebSocket frame is a JSON object carrying a `type` discriminator.
//! The client dispatches inbound frames by that name, so the string constants
//! in [`frames`] double as event names for listeners.

pub mod api;
pub mod close;
pub mod frames;
pub mod outbound;

pub use api::{ApiErrorBody, ChatHistory, HistoryMessage, SessionCreated};
pub use close::{ABNORMAL_CLOSURE, NORMAL_CLOSURE, is_normal_closure};
pub use frames::{InboundFrame, StreamEnd, StreamError, StreamMetadata, StreamStart, StreamToken};
pub use outbound::{ChatMessage, OutboundFrame};
