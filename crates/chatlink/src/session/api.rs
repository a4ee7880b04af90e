//! Chat HTTP API client.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};

use chatlink_protocol::{ApiErrorBody, ChatHistory, SessionCreated};

use super::error::{SessionError, SessionResult};
use crate::config::ApiConfig;

/// Session operations offered by the chat backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Create a new session and return its id.
    async fn create_session(&self) -> SessionResult<String>;

    /// Fetch the stored conversation of a session.
    async fn fetch_history(&self, session_id: &str) -> SessionResult<ChatHistory>;
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    /// Base URL of the API (e.g., "http://localhost:8000").
    base_url: String,
}

impl HttpChatApi {
    pub fn new(config: &ApiConfig) -> SessionResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self) -> String {
        format!("{}/api/chat/session", self.base_url)
    }

    fn history_url(&self, session_id: &str) -> String {
        format!(
            "{}/api/chat/history/{}",
            self.base_url,
            urlencoding::encode(session_id)
        )
    }

    /// Parse a JSON body or turn an error status into [`SessionError::Api`].
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> SessionResult<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SessionError::Parse(format!("Failed to parse response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(error) => match error.error_code {
                Some(code) => format!("{} ({})", error.message, code),
                None => error.message,
            },
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => body,
        };

        Err(SessionError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn create_session(&self) -> SessionResult<String> {
        let url = self.session_url();
        debug!("Creating chat session via {}", url);
        let response = self.client.post(&url).send().await?;

        let created: SessionCreated = self.handle_response(response).await?;
        Ok(created.session_id)
    }

    async fn fetch_history(&self, session_id: &str) -> SessionResult<ChatHistory> {
        let url = self.history_url(session_id);
        debug!("Fetching chat history from {}", url);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SessionError::Api {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("session {} not found", session_id),
            });
        }
        self.handle_response(response).await
    }
}
