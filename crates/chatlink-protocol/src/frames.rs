//! Server -> client frames.
//!
//! The client never needs the typed form to dispatch a frame: it reads the
//! `type` field and hands listeners the whole JSON object. The typed structs
//! exist for listeners that want to decode their payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Frame type names
// ============================================================================

pub const STREAM_START: &str = "stream_start";
pub const STREAM_TOKEN: &str = "stream_token";
pub const STREAM_END: &str = "stream_end";
pub const STREAM_ERROR: &str = "stream_error";
pub const METADATA: &str = "metadata";

/// Frames the server writes to the socket, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// The backend accepted a message and is about to stream the answer.
    StreamStart(StreamStart),
    /// One fragment of the answer.
    StreamToken(StreamToken),
    /// The answer is complete.
    StreamEnd(StreamEnd),
    /// The answer could not be produced. The connection stays usable.
    StreamError(StreamError),
    /// Retrieval statistics sent ahead of the tokens.
    Metadata(StreamMetadata),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamToken {
    pub message_id: String,
    pub token: String,
    /// Position of this token within the stream.
    #[serde(default)]
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    pub message_id: String,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    #[serde(default)]
    pub message_id: String,
    pub error_code: String,
    pub message: String,
    /// Remediation hints to show the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub solutions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub search_results: u32,
    #[serde(default)]
    pub ranked_results: u32,
    #[serde(default)]
    pub reranking_applied: bool,
}

impl InboundFrame {
    /// Decode a frame that has already been parsed as JSON.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }

    /// The wire name of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::StreamStart(_) => STREAM_START,
            InboundFrame::StreamToken(_) => STREAM_TOKEN,
            InboundFrame::StreamEnd(_) => STREAM_END,
            InboundFrame::StreamError(_) => STREAM_ERROR,
            InboundFrame::Metadata(_) => METADATA,
        }
    }

    /// The message this frame answers, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            InboundFrame::StreamStart(f) => Some(&f.message_id),
            InboundFrame::StreamToken(f) => Some(&f.message_id),
            InboundFrame::StreamEnd(f) => Some(&f.message_id),
            InboundFrame::StreamError(f) if !f.message_id.is_empty() => Some(&f.message_id),
            InboundFrame::StreamError(_) => None,
            InboundFrame::Metadata(f) => f.message_id.as_deref(),
        }
    }

    /// Whether this frame finishes the stream it belongs to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InboundFrame::StreamEnd(_) | InboundFrame::StreamError(_)
        )
    }
}

/// Whether a frame type name finishes a stream.
pub fn is_terminal_kind(kind: &str) -> bool {
    kind == STREAM_END || kind == STREAM_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_token_without_index() {
        let value = json!({"type": "stream_token", "message_id": "msg-001", "token": "hi"});
        let frame = InboundFrame::from_value(&value).unwrap();

        assert_eq!(
            frame,
            InboundFrame::StreamToken(StreamToken {
                message_id: "msg-001".to_string(),
                token: "hi".to_string(),
                index: 0,
            })
        );
        assert_eq!(frame.kind(), STREAM_TOKEN);
        assert!(!frame.is_terminal());
    }

    #[test]
    fn test_stream_error_with_solutions() {
        let value = json!({
            "type": "stream_error",
            "message_id": "msg-002",
            "error_code": "GEN-001",
            "message": "답변 생성 중 오류가 발생했습니다",
            "solutions": ["잠시 후 다시 시도하세요", "질문을 짧게 줄여보세요"]
        });

        match InboundFrame::from_value(&value).unwrap() {
            InboundFrame::StreamError(err) => {
                assert_eq!(err.error_code, "GEN-001");
                assert_eq!(err.solutions.len(), 2);
            }
            other => panic!("Expected stream error, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_error_without_message_id() {
        let value = json!({"type": "stream_error", "error_code": "GEN-999", "message": "boom"});
        let frame = InboundFrame::from_value(&value).unwrap();

        assert!(frame.is_terminal());
        assert_eq!(frame.message_id(), None);
    }

    #[test]
    fn test_stream_end_accepts_integer_processing_time() {
        let value = json!({
            "type": "stream_end",
            "message_id": "msg-003",
            "total_tokens": 42,
            "processing_time_ms": 1250
        });

        match InboundFrame::from_value(&value).unwrap() {
            InboundFrame::StreamEnd(end) => {
                assert_eq!(end.total_tokens, 42);
                assert!((end.processing_time_ms - 1250.0).abs() < f64::EPSILON);
            }
            other => panic!("Expected stream end, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let value = json!({"type": "typing", "message_id": "msg-004"});
        assert!(InboundFrame::from_value(&value).is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(is_terminal_kind(STREAM_END));
        assert!(is_terminal_kind(STREAM_ERROR));
        assert!(!is_terminal_kind(STREAM_TOKEN));
        assert!(!is_terminal_kind(METADATA));
    }
}
