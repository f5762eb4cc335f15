use super::config::SessionConfig;
use super::error::SessionError;
use super::message::{HistoryMessage, Message, RecoveryState, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    RecordingMessage,
    ProcessingTranscription,
    /// Reported to clients while an opinion prediction runs; never stored as the primary status
    GeneratingOpinion,
    GeneratingResponse,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::RecordingMessage => "recording_message",
            SessionStatus::ProcessingTranscription => "processing_transcription",
            SessionStatus::GeneratingOpinion => "generating_opinion",
            SessionStatus::GeneratingResponse => "generating_response",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message taken out of the recording state, waiting for its transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: String,
    pub sender: String,
}

/// Where an entry of the message history projection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageProvenance {
    /// Seed history supplied at conversation start
    History,
    /// Spoken turn recorded and transcribed in this session
    Recording,
    /// Reply suggestion the user picked
    SelectedResponse,
}

/// One entry of the read-only message history projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message_id: String,
    pub sender: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub message_type: MessageProvenance,
}

/// The aggregate root for one conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    pub status: SessionStatus,

    /// Seed context supplied at creation time
    pub history_messages: Vec<HistoryMessage>,
    /// Messages recorded in this session, in conversation order
    pub messages: Vec<Message>,

    pub current_message_id: Option<String>,
    pub current_message_sender: Option<String>,

    pub modifications: Vec<String>,
    pub focused_message_ids: Vec<String>,
    pub user_opinion: Option<String>,
    pub profile: UserProfile,

    pub active_response_request_id: Option<String>,
    pub active_opinion_request_id: Option<String>,

    pub recovery: RecoveryState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, config: SessionConfig, history_messages: Vec<HistoryMessage>) -> Self {
        let now = Utc::now();
        Self {
            id,
            config,
            status: SessionStatus::Idle,
            history_messages,
            messages: Vec::new(),
            current_message_id: None,
            current_message_sender: None,
            modifications: Vec::new(),
            focused_message_ids: Vec::new(),
            user_opinion: None,
            profile: UserProfile::default(),
            active_response_request_id: None,
            active_opinion_request_id: None,
            recovery: RecoveryState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid_state(&self, action: &'static str) -> SessionError {
        SessionError::InvalidState {
            session_id: self.id.clone(),
            status: self.status,
            action,
        }
    }

    /// `RecordingMessage` holds a sender; every other status holds none
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SessionStatus::RecordingMessage => self.current_message_sender.is_some(),
            _ => self.current_message_id.is_none() && self.current_message_sender.is_none(),
        }
    }

    // ------------------------------------------------------------------
    // Recording state machine
    // ------------------------------------------------------------------

    /// Begin recording a new spoken turn and return its temporary id
    ///
    /// Restarting while already recording discards the unfinished turn.
    pub fn start_message(&mut self, sender: &str) -> Result<String, SessionError> {
        if self.status == SessionStatus::ProcessingTranscription {
            return Err(self.invalid_state("start a message"));
        }

        let temp_id = format!(
            "temp_{}_{}",
            self.messages.len(),
            Utc::now().timestamp_millis()
        );
        self.current_message_id = Some(temp_id.clone());
        self.current_message_sender = Some(sender.to_string());
        self.recovery.clear();
        self.status = SessionStatus::RecordingMessage;
        self.touch();

        Ok(temp_id)
    }

    /// Stop recording and move to `ProcessingTranscription`
    pub fn begin_transcription(&mut self) -> Result<PendingMessage, SessionError> {
        if self.status != SessionStatus::RecordingMessage {
            return Err(SessionError::NoMessageInProgress(self.id.clone()));
        }

        let sender = self
            .current_message_sender
            .take()
            .ok_or_else(|| SessionError::NoMessageInProgress(self.id.clone()))?;
        let temp_id = self.current_message_id.take().unwrap_or_default();

        self.status = SessionStatus::ProcessingTranscription;
        self.touch();

        Ok(PendingMessage { temp_id, sender })
    }

    /// Assign a formal id to the transcribed turn, append it and return to `Idle`
    pub fn complete_message(
        &mut self,
        pending: PendingMessage,
        content: String,
    ) -> Result<Message, SessionError> {
        if self.status != SessionStatus::ProcessingTranscription {
            return Err(SessionError::NoMessageInProgress(self.id.clone()));
        }

        let formal_id = format!("msg_{:03}", self.messages.len() + 1);
        let message = Message::new(formal_id, pending.sender, content, false);
        self.messages.push(message.clone());

        self.current_message_id = None;
        self.current_message_sender = None;
        self.recovery.clear();
        self.status = SessionStatus::Idle;
        self.touch();

        Ok(message)
    }

    /// Finish the current recording in one step
    pub fn end_message(&mut self, content: String) -> Result<Message, SessionError> {
        let pending = self.begin_transcription()?;
        self.complete_message(pending, content)
    }

    /// Record a reply suggestion the user picked
    pub fn add_selected_response(&mut self, content: String, sender: String) -> Message {
        let id = format!("usr_{:03}", self.messages.len() + 1);
        let message = Message::new(id, sender, content, true);
        self.messages.push(message.clone());
        self.touch();
        message
    }

    // ------------------------------------------------------------------
    // Configuration and steering
    // ------------------------------------------------------------------

    pub fn update_scenario(&mut self, scenario: String) {
        self.config.scenario_description = Some(scenario);
        self.touch();
    }

    pub fn update_response_count(&mut self, count: u8) -> Result<(), SessionError> {
        if !SessionConfig::is_valid_response_count(count) {
            return Err(SessionError::InvalidResponseCount(count));
        }
        self.config.response_count = count;
        self.touch();
        Ok(())
    }

    pub fn add_modification(&mut self, modification: String) {
        self.modifications.push(modification);
        self.touch();
    }

    pub fn clear_modifications(&mut self) {
        self.modifications.clear();
        self.touch();
    }

    pub fn set_focused_messages(&mut self, ids: Vec<String>) {
        self.focused_message_ids = ids;
        self.touch();
    }

    pub fn set_user_opinion(&mut self, opinion: String) {
        self.user_opinion = Some(opinion);
        self.touch();
    }

    pub fn update_profile(&mut self, update: UserProfile) {
        self.profile.merge(update);
        self.touch();
    }

    // ------------------------------------------------------------------
    // Request linkage
    // ------------------------------------------------------------------

    /// Link a response request; a session in `Idle` moves to `GeneratingResponse`
    pub fn begin_response_generation(&mut self, request_id: &str) {
        self.active_response_request_id = Some(request_id.to_string());
        if matches!(
            self.status,
            SessionStatus::Idle | SessionStatus::GeneratingResponse
        ) {
            self.status = SessionStatus::GeneratingResponse;
        }
        self.touch();
    }

    /// Unlink a response request if it is still the active one
    ///
    /// Returns false when a newer request has taken its place.
    pub fn finish_response_generation(&mut self, request_id: &str, completed: bool) -> bool {
        if self.active_response_request_id.as_deref() != Some(request_id) {
            return false;
        }
        self.active_response_request_id = None;
        if self.status == SessionStatus::GeneratingResponse {
            self.status = SessionStatus::Idle;
        }
        if completed {
            self.modifications.clear();
        }
        self.touch();
        true
    }

    pub fn begin_opinion_prediction(&mut self, request_id: &str) {
        self.active_opinion_request_id = Some(request_id.to_string());
        self.touch();
    }

    pub fn finish_opinion_prediction(&mut self, request_id: &str) -> bool {
        if self.active_opinion_request_id.as_deref() != Some(request_id) {
            return false;
        }
        self.active_opinion_request_id = None;
        self.touch();
        true
    }

    /// Drop request links inherited from an earlier lifetime of the session
    pub fn reset_request_links(&mut self) {
        self.active_response_request_id = None;
        self.active_opinion_request_id = None;
        if matches!(
            self.status,
            SessionStatus::GeneratingResponse
                | SessionStatus::GeneratingOpinion
                | SessionStatus::ProcessingTranscription
        ) {
            self.status = SessionStatus::Idle;
            self.current_message_id = None;
            self.current_message_sender = None;
        }
        self.touch();
    }

    // ------------------------------------------------------------------
    // Disconnect recovery
    // ------------------------------------------------------------------

    /// Keep captured audio of an interrupted recording; the session stays in `RecordingMessage`
    pub fn freeze_recording(&mut self, audio: Vec<u8>, partial_transcription: String) {
        self.recovery.audio_buffer = audio;
        self.recovery.partial_transcription = Some(partial_transcription);
        self.touch();
    }

    pub fn mark_recovering(&mut self) {
        self.recovery.recovering = true;
        self.touch();
    }

    /// Clear the one-shot recovery flag, returning whether it was set
    pub fn clear_recovering(&mut self) -> bool {
        if !self.recovery.recovering {
            return false;
        }
        self.recovery.recovering = false;
        self.touch();
        true
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Focused messages in the order they were chosen; unknown ids are skipped
    pub fn focused_messages(&self) -> Vec<&Message> {
        self.focused_message_ids
            .iter()
            .filter_map(|id| self.message(id))
            .collect()
    }

    /// Seed history followed by recorded messages, tagged by provenance
    pub fn history_projection(&self) -> Vec<HistoryEntry> {
        let seeds = self.history_messages.iter().map(|h| HistoryEntry {
            message_id: h.message_id.clone(),
            sender: h.sender.clone(),
            content: h.content.clone(),
            created_at: None,
            message_type: MessageProvenance::History,
        });

        let recorded = self.messages.iter().map(|m| HistoryEntry {
            message_id: m.id.clone(),
            sender: m.sender.clone(),
            content: m.content.clone(),
            created_at: Some(m.timestamp),
            message_type: if m.is_user_selected {
                MessageProvenance::SelectedResponse
            } else {
                MessageProvenance::Recording
            },
        });

        seeds.chain(recorded).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("s1".to_string(), SessionConfig::default(), Vec::new())
    }

    #[test]
    fn test_start_message_enters_recording() {
        let mut s = session();
        let temp_id = s.start_message("alice").unwrap();

        assert!(temp_id.starts_with("temp_0_"));
        assert_eq!(s.status, SessionStatus::RecordingMessage);
        assert_eq!(s.current_message_sender.as_deref(), Some("alice"));
        assert!(s.is_consistent());
    }

    #[test]
    fn test_end_message_without_recording_is_rejected() {
        let mut s = session();
        let err = s.end_message("hello".to_string()).unwrap_err();

        assert_eq!(err, SessionError::NoMessageInProgress("s1".to_string()));
        assert!(s.messages.is_empty());
        assert_eq!(s.status, SessionStatus::Idle);
    }

    #[test]
    fn test_transcription_keeps_state_consistent() {
        let mut s = session();
        s.start_message("alice").unwrap();

        let pending = s.begin_transcription().unwrap();
        assert_eq!(s.status, SessionStatus::ProcessingTranscription);
        assert!(s.is_consistent());

        let message = s.complete_message(pending, "hi there".to_string()).unwrap();
        assert_eq!(message.id, "msg_001");
        assert_eq!(message.sender, "alice");
        assert_eq!(s.status, SessionStatus::Idle);
        assert!(s.is_consistent());
    }

    #[test]
    fn test_completion_clears_recovery_state() {
        let mut s = session();
        s.start_message("alice").unwrap();
        s.freeze_recording(vec![1, 2, 3], "partial".to_string());
        s.mark_recovering();

        s.end_message("done".to_string()).unwrap();

        assert_eq!(s.recovery, RecoveryState::default());
    }

    #[test]
    fn test_formal_ids_increase() {
        let mut s = session();
        for i in 0..4 {
            s.start_message("bob").unwrap();
            s.end_message(format!("turn {}", i)).unwrap();
            if i == 1 {
                s.add_selected_response("picked".to_string(), "me".to_string());
            }
        }

        let sequences: Vec<u32> = s.messages.iter().filter_map(|m| m.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert!(s.message("usr_003").unwrap().is_user_selected);
    }

    #[test]
    fn test_start_message_rejected_while_transcribing() {
        let mut s = session();
        s.start_message("alice").unwrap();
        s.begin_transcription().unwrap();

        assert!(matches!(
            s.start_message("bob"),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_response_count_bounds() {
        let mut s = session();
        assert!(s.update_response_count(0).is_err());
        assert!(s.update_response_count(6).is_err());
        s.update_response_count(5).unwrap();
        assert_eq!(s.config.response_count, 5);
    }

    #[test]
    fn test_generation_links_only_move_idle_sessions() {
        let mut s = session();
        s.begin_response_generation("r1");
        assert_eq!(s.status, SessionStatus::GeneratingResponse);

        s.add_modification("shorter".to_string());
        assert!(!s.finish_response_generation("stale", true));
        assert!(s.finish_response_generation("r1", true));
        assert_eq!(s.status, SessionStatus::Idle);
        assert!(s.modifications.is_empty());

        s.start_message("alice").unwrap();
        s.begin_response_generation("r2");
        assert_eq!(s.status, SessionStatus::RecordingMessage);
        assert!(s.is_consistent());
    }

    #[test]
    fn test_history_projection_tags_provenance() {
        let mut s = Session::new(
            "s2".to_string(),
            SessionConfig::default(),
            vec![HistoryMessage {
                message_id: "h1".to_string(),
                sender: "friend".to_string(),
                content: "earlier".to_string(),
            }],
        );
        s.start_message("friend").unwrap();
        s.end_message("spoken".to_string()).unwrap();
        s.add_selected_response("chosen".to_string(), "me".to_string());

        let kinds: Vec<MessageProvenance> =
            s.history_projection().iter().map(|e| e.message_type).collect();
        assert_eq!(
            kinds,
            vec![
                MessageProvenance::History,
                MessageProvenance::Recording,
                MessageProvenance::SelectedResponse
            ]
        );
    }
}
