use crate::session::{
    HistoryMessage, Message, RecoveryState, Session, SessionConfig, SessionStatus, UserProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_response_count() -> u8 {
    SessionConfig::default().response_count
}

fn default_status() -> SessionStatus {
    SessionStatus::Idle
}

/// Serialized form of a session, one file per session id
///
/// Every session field is kept. Request ids are carried along but only as a
/// hint; they belong to whatever process wrote the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default)]
    pub scenario_description: Option<String>,
    #[serde(default = "default_response_count")]
    pub response_count: u8,
    #[serde(default = "default_status")]
    pub status: SessionStatus,

    #[serde(default)]
    pub history_messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub current_message_id: Option<String>,
    #[serde(default)]
    pub current_message_sender: Option<String>,

    #[serde(default)]
    pub modifications: Vec<String>,
    #[serde(default)]
    pub focused_message_ids: Vec<String>,
    #[serde(default)]
    pub user_opinion: Option<String>,
    #[serde(default)]
    pub profile: UserProfile,

    #[serde(default)]
    pub active_response_request_id: Option<String>,
    #[serde(default)]
    pub active_opinion_request_id: Option<String>,

    #[serde(default)]
    pub recovery: RecoveryState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            scenario_description: session.config.scenario_description.clone(),
            response_count: session.config.response_count,
            status: session.status,
            history_messages: session.history_messages.clone(),
            messages: session.messages.clone(),
            current_message_id: session.current_message_id.clone(),
            current_message_sender: session.current_message_sender.clone(),
            modifications: session.modifications.clone(),
            focused_message_ids: session.focused_message_ids.clone(),
            user_opinion: session.user_opinion.clone(),
            profile: session.profile.clone(),
            active_response_request_id: session.active_response_request_id.clone(),
            active_opinion_request_id: session.active_opinion_request_id.clone(),
            recovery: session.recovery.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            persisted_at: Utc::now(),
        }
    }

    /// Rebuild the session
    ///
    /// A snapshot edited by hand may break the recording invariant or the
    /// reply count bounds; both are repaired rather than rejected.
    pub fn into_session(self) -> Session {
        let response_count = if SessionConfig::is_valid_response_count(self.response_count) {
            self.response_count
        } else {
            default_response_count()
        };

        let mut session = Session::new(
            self.id,
            SessionConfig::new(self.scenario_description, response_count),
            self.history_messages,
        );
        session.status = self.status;
        session.messages = self.messages;
        session.current_message_id = self.current_message_id;
        session.current_message_sender = self.current_message_sender;
        session.modifications = self.modifications;
        session.focused_message_ids = self.focused_message_ids;
        session.user_opinion = self.user_opinion;
        session.profile = self.profile;
        session.active_response_request_id = self.active_response_request_id;
        session.active_opinion_request_id = self.active_opinion_request_id;
        session.recovery = self.recovery;
        session.created_at = self.created_at;
        session.updated_at = self.updated_at;

        if !session.is_consistent() {
            session.status = SessionStatus::Idle;
            session.current_message_id = None;
            session.current_message_sender = None;
        }
        session
    }
}

/// Snapshot header, read without rebuilding the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub session_id: String,
    pub status: SessionStatus,
    pub message_count: usize,
    pub has_scenario: bool,
    pub response_count: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
}

impl From<&SessionSnapshot> for SnapshotInfo {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.id.clone(),
            status: snapshot.status,
            message_count: snapshot.messages.len(),
            has_scenario: snapshot.scenario_description.is_some(),
            response_count: snapshot.response_count,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            persisted_at: snapshot.persisted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inconsistent_recording_is_repaired() {
        let mut session = Session::new("s1".to_string(), SessionConfig::default(), Vec::new());
        session.start_message("alice").unwrap();

        let mut snapshot = SessionSnapshot::capture(&session);
        snapshot.current_message_sender = None;
        snapshot.response_count = 9;

        let restored = snapshot.into_session();
        assert_eq!(restored.status, SessionStatus::Idle);
        assert_eq!(restored.config.response_count, 3);
        assert!(restored.is_consistent());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "id": "s2",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z",
            "persisted_at": "2024-05-01T10:06:00Z"
        }"#;
        let snapshot: SessionSnapshot = serde_json::from_str(json).unwrap();
        let session = snapshot.into_session();

        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.config.response_count, 3);
        assert!(session.messages.is_empty());
    }
}
