use super::session::{Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compact view of a session for diagnostics and health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub message_count: usize,
    pub history_count: usize,
    pub modification_count: usize,
    pub focused_message_count: usize,
    pub has_scenario: bool,
    pub has_user_opinion: bool,
    pub response_count: u8,
    pub active_response_request: Option<String>,
    pub active_opinion_request: Option<String>,
    pub recovering: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            message_count: session.messages.len(),
            history_count: session.history_messages.len(),
            modification_count: session.modifications.len(),
            focused_message_count: session.focused_message_ids.len(),
            has_scenario: session.config.scenario_description.is_some(),
            has_user_opinion: session.user_opinion.is_some(),
            response_count: session.config.response_count,
            active_response_request: session.active_response_request_id.clone(),
            active_opinion_request: session.active_opinion_request_id.clone(),
            recovering: session.recovery.recovering,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}
