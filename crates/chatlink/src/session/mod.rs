//! Session management.
//!
//! The transport is bound to a session id. This module owns where that id
//! comes from:
//! - a [`SessionStore`] remembering the current id between runs
//! - a [`ChatApi`] creating sessions and fetching their history
//! - a [`SessionManager`] combining both

mod api;
mod error;
mod manager;
mod store;

pub use api::{ChatApi, HttpChatApi};
pub use error::{SessionError, SessionResult};
pub use manager::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
