use crate::session::{HistoryMessage, SessionConfig, UserProfile};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding an inbound frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid data for {event}: {reason}")]
    InvalidData { event: String, reason: String },
}

/// The `{type, data}` envelope shared by both directions
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

fn default_response_count() -> u8 {
    SessionConfig::default().response_count
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationStart {
    #[serde(default)]
    pub scenario_description: Option<String>,
    #[serde(default = "default_response_count")]
    pub response_count: u8,
    #[serde(default)]
    pub history_messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageStart {
    pub session_id: String,
    pub sender: String,
}

#[derive(Debug, Deserialize)]
struct AudioStreamData {
    session_id: String,
    audio_chunk: String,
}

/// A decoded audio chunk
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub session_id: String,
    pub audio: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualGenerate {
    pub session_id: String,
    #[serde(default)]
    pub focused_message_ids: Option<Vec<String>>,
    #[serde(default)]
    pub user_opinion: Option<String>,
    #[serde(default)]
    pub user_corpus: Option<String>,
    #[serde(default)]
    pub user_background: Option<String>,
    #[serde(default)]
    pub user_preferences: Option<String>,
    #[serde(default)]
    pub user_recent_experiences: Option<String>,
}

impl ManualGenerate {
    /// Profile fields supplied with this request
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            corpus: self.user_corpus.clone(),
            background: self.user_background.clone(),
            preferences: self.user_preferences.clone(),
            recent_experiences: self.user_recent_experiences.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserModification {
    pub session_id: String,
    pub modification: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserSelectedResponse {
    pub session_id: String,
    pub selected_content: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioSupplement {
    pub session_id: String,
    pub supplement: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseCountUpdate {
    pub session_id: String,
    pub response_count: u8,
}

/// Payload of events that only name a session
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionRef {
    pub session_id: String,
}

/// Every event a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ConversationStart(ConversationStart),
    MessageStart(MessageStart),
    AudioStream(AudioChunk),
    MessageEnd(SessionRef),
    ManualGenerate(ManualGenerate),
    UserModification(UserModification),
    UserSelectedResponse(UserSelectedResponse),
    ScenarioSupplement(ScenarioSupplement),
    ResponseCountUpdate(ResponseCountUpdate),
    ConversationEnd(SessionRef),
    SessionResume(SessionRef),
    GetMessageHistory(SessionRef),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ConversationStart(_) => "conversation_start",
            InboundEvent::MessageStart(_) => "message_start",
            InboundEvent::AudioStream(_) => "audio_stream",
            InboundEvent::MessageEnd(_) => "message_end",
            InboundEvent::ManualGenerate(_) => "manual_generate",
            InboundEvent::UserModification(_) => "user_modification",
            InboundEvent::UserSelectedResponse(_) => "user_selected_response",
            InboundEvent::ScenarioSupplement(_) => "scenario_supplement",
            InboundEvent::ResponseCountUpdate(_) => "response_count_update",
            InboundEvent::ConversationEnd(_) => "conversation_end",
            InboundEvent::SessionResume(_) => "session_resume",
            InboundEvent::GetMessageHistory(_) => "get_message_history",
        }
    }

    /// Session the event targets; `conversation_start` targets none
    pub fn session_id(&self) -> Option<&str> {
        match self {
            InboundEvent::ConversationStart(_) => None,
            InboundEvent::MessageStart(e) => Some(&e.session_id),
            InboundEvent::AudioStream(e) => Some(&e.session_id),
            InboundEvent::ManualGenerate(e) => Some(&e.session_id),
            InboundEvent::UserModification(e) => Some(&e.session_id),
            InboundEvent::UserSelectedResponse(e) => Some(&e.session_id),
            InboundEvent::ScenarioSupplement(e) => Some(&e.session_id),
            InboundEvent::ResponseCountUpdate(e) => Some(&e.session_id),
            InboundEvent::MessageEnd(e)
            | InboundEvent::ConversationEnd(e)
            | InboundEvent::SessionResume(e)
            | InboundEvent::GetMessageHistory(e) => Some(&e.session_id),
        }
    }

    /// Decode and validate a text frame
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        let kind = envelope.kind.as_str();
        let data = match envelope.data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let event = match kind {
            "conversation_start" => InboundEvent::ConversationStart(payload(kind, data)?),
            "message_start" => InboundEvent::MessageStart(payload(kind, data)?),
            "audio_stream" => {
                let raw: AudioStreamData = payload(kind, data)?;
                let audio = base64::engine::general_purpose::STANDARD
                    .decode(raw.audio_chunk.trim())
                    .map_err(|e| invalid(kind, format!("audio_chunk is not base64: {}", e)))?;
                InboundEvent::AudioStream(AudioChunk {
                    session_id: raw.session_id,
                    audio,
                })
            }
            "message_end" => InboundEvent::MessageEnd(payload(kind, data)?),
            "manual_generate" => InboundEvent::ManualGenerate(payload(kind, data)?),
            "user_modification" => InboundEvent::UserModification(payload(kind, data)?),
            "user_selected_response" => InboundEvent::UserSelectedResponse(payload(kind, data)?),
            "scenario_supplement" => InboundEvent::ScenarioSupplement(payload(kind, data)?),
            "response_count_update" => InboundEvent::ResponseCountUpdate(payload(kind, data)?),
            "conversation_end" => InboundEvent::ConversationEnd(payload(kind, data)?),
            "session_resume" => InboundEvent::SessionResume(payload(kind, data)?),
            "get_message_history" => InboundEvent::GetMessageHistory(payload(kind, data)?),
            other => return Err(ProtocolError::UnknownEventType(other.to_string())),
        };

        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let kind = self.kind();

        if let Some(session_id) = self.session_id() {
            if session_id.trim().is_empty() {
                return Err(invalid(kind, "session_id must not be empty"));
            }
        }

        match self {
            InboundEvent::ConversationStart(e) => check_response_count(kind, e.response_count),
            InboundEvent::ResponseCountUpdate(e) => check_response_count(kind, e.response_count),
            InboundEvent::MessageStart(e) if e.sender.trim().is_empty() => {
                Err(invalid(kind, "sender must not be empty"))
            }
            InboundEvent::UserModification(e) if e.modification.trim().is_empty() => {
                Err(invalid(kind, "modification must not be empty"))
            }
            InboundEvent::UserSelectedResponse(e) if e.selected_content.trim().is_empty() => {
                Err(invalid(kind, "selected_content must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| invalid(kind, e.to_string()))
}

fn invalid(kind: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidData {
        event: kind.to_string(),
        reason: reason.into(),
    }
}

fn check_response_count(kind: &str, count: u8) -> Result<(), ProtocolError> {
    if SessionConfig::is_valid_response_count(count) {
        Ok(())
    } else {
        Err(invalid(
            kind,
            format!("response_count must be between 1 and 5, got {}", count),
        ))
    }
}
