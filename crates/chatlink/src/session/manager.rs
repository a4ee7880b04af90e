//! Resolves which session the client talks to.

use std::sync::Arc;

use log::info;

use chatlink_protocol::ChatHistory;

use super::{ChatApi, SessionError, SessionResult, SessionStore};

/// Combines a [`SessionStore`] with a [`ChatApi`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    api: Arc<dyn ChatApi>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, api: Arc<dyn ChatApi>) -> Self {
        Self { store, api }
    }

    /// The stored session id.
    pub async fn current(&self) -> SessionResult<Option<String>> {
        self.store.load().await
    }

    /// Pick the session to use.
    ///
    /// An explicit id wins and becomes the stored one. Otherwise the stored id
    /// is reused, and a new session is created only when nothing is stored.
    pub async fn ensure_session(&self, preferred: Option<&str>) -> SessionResult<String> {
        if let Some(session_id) = preferred {
            self.store.save(session_id).await?;
            return Ok(session_id.to_string());
        }
        if let Some(session_id) = self.store.load().await? {
            return Ok(session_id);
        }
        self.new_session().await
    }

    /// Create a session on the backend and store it.
    pub async fn new_session(&self) -> SessionResult<String> {
        let session_id = self.api.create_session().await?;
        self.store.save(&session_id).await?;
        info!("Created chat session {}", session_id);
        Ok(session_id)
    }

    /// History of `session_id`, or of the stored session.
    pub async fn history(&self, session_id: Option<&str>) -> SessionResult<ChatHistory> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.store.load().await?.ok_or(SessionError::NoSession)?,
        };
        self.api.fetch_history(&session_id).await
    }

    /// Forget the stored session.
    pub async fn clear(&self) -> SessionResult<()> {
        self.store.clear().await
    }
}
