use crate::generation::OpinionPrediction;
use crate::session::{HistoryEntry, Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stable error codes clients can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidEventType,
    InvalidEventData,
    InvalidSessionState,
    SttServiceError,
    InternalError,
}

/// Every event the backend pushes to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    SessionCreated {
        session_id: String,
    },
    MessageRecorded {
        session_id: String,
        message_id: String,
        /// Only present for transcribed recordings
        #[serde(skip_serializing_if = "Option::is_none")]
        message_content: Option<String>,
    },
    LlmResponse {
        session_id: String,
        suggestions: Vec<String>,
        request_id: String,
    },
    OpinionPredictionResponse {
        session_id: String,
        prediction: OpinionPrediction,
        request_id: String,
    },
    StatusUpdate {
        session_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    SessionRestored {
        session_id: String,
        status: SessionStatus,
        message_count: usize,
        scenario_description: Option<String>,
        response_count: u8,
        has_modifications: bool,
        restored_at: DateTime<Utc>,
    },
    MessageHistoryResponse {
        session_id: String,
        messages: Vec<HistoryEntry>,
        total_count: usize,
        request_id: String,
    },
    PartialTranscription {
        session_id: String,
        text: String,
        recovered: bool,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error_code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl OutboundEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::SessionCreated { .. } => "session_created",
            OutboundEvent::MessageRecorded { .. } => "message_recorded",
            OutboundEvent::LlmResponse { .. } => "llm_response",
            OutboundEvent::OpinionPredictionResponse { .. } => "opinion_prediction_response",
            OutboundEvent::StatusUpdate { .. } => "status_update",
            OutboundEvent::SessionRestored { .. } => "session_restored",
            OutboundEvent::MessageHistoryResponse { .. } => "message_history_response",
            OutboundEvent::PartialTranscription { .. } => "partial_transcription",
            OutboundEvent::Heartbeat { .. } => "heartbeat",
            OutboundEvent::Error { .. } => "error",
        }
    }

    pub fn status(session_id: &str, status: SessionStatus, message: impl Into<String>) -> Self {
        OutboundEvent::StatusUpdate {
            session_id: session_id.to_string(),
            status,
            message: Some(message.into()),
        }
    }

    pub fn restored(session: &Session) -> Self {
        OutboundEvent::SessionRestored {
            session_id: session.id.clone(),
            status: session.status,
            message_count: session.messages.len(),
            scenario_description: session.config.scenario_description.clone(),
            response_count: session.config.response_count,
            has_modifications: !session.modifications.is_empty(),
            restored_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_envelope_shape() {
        let event = OutboundEvent::SessionCreated {
            session_id: "s1".to_string(),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "session_created");
        assert_eq!(value["data"]["session_id"], "s1");
    }

    #[test]
    fn test_error_code_serialization() {
        let event = OutboundEvent::Error {
            session_id: None,
            error_code: ErrorCode::SttServiceError,
            message: "stream not started".to_string(),
            details: None,
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["error_code"], "STT_SERVICE_ERROR");
        assert!(value["data"].get("session_id").is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let event = OutboundEvent::status("s1", SessionStatus::RecordingMessage, "go on");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["data"]["status"], "recording_message");
        assert_eq!(event.event_type(), "status_update");
    }
}
