//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatClientConfig {
    /// WebSocket base URL (e.g., "ws://localhost:8000").
    pub ws_base_url: String,
    /// Path of the chat endpoint below the base URL.
    pub chat_endpoint: String,
    /// Reconnect attempts after an abnormal close before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt; doubles on every attempt.
    pub reconnect_interval_ms: u64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000".to_string(),
            chat_endpoint: "ws/chat".to_string(),
            max_reconnect_attempts: 5,
            reconnect_interval_ms: 1000,
        }
    }
}

impl ChatClientConfig {
    /// Build the socket URL for a session: `<ws-base>/<chat-endpoint>?session_id=<id>`.
    pub fn connection_url(&self, session_id: &str) -> String {
        format!(
            "{}/{}?session_id={}",
            self.ws_base_url.trim_end_matches('/'),
            self.chat_endpoint.trim_matches('/'),
            urlencoding::encode(session_id)
        )
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Chat HTTP API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the chat API (e.g., "http://localhost:8000").
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
