use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded turn of the conversation
///
/// Messages are immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True when the message is a reply suggestion the user picked
    pub is_user_selected: bool,
}

impl Message {
    pub fn new(id: String, sender: String, content: String, is_user_selected: bool) -> Self {
        Self {
            id,
            sender,
            content,
            timestamp: Utc::now(),
            is_user_selected,
        }
    }

    /// Numeric part of a formal id (`msg_007` -> 7), if any
    pub fn sequence(&self) -> Option<u32> {
        self.id
            .rsplit_once('_')
            .and_then(|(_, n)| n.parse().ok())
    }
}

/// A message from an earlier conversation, supplied when the session starts
///
/// Seed history is read-only context; it is never renumbered or mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub message_id: String,
    pub sender: String,
    pub content: String,
}

/// Optional facts about the user that steer reply generation
///
/// Each field is updated independently and never cleared automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub corpus: Option<String>,
    pub background: Option<String>,
    pub preferences: Option<String>,
    pub recent_experiences: Option<String>,
}

impl UserProfile {
    /// Overwrite only the fields that are present in `update`
    pub fn merge(&mut self, update: UserProfile) {
        if update.corpus.is_some() {
            self.corpus = update.corpus;
        }
        if update.background.is_some() {
            self.background = update.background;
        }
        if update.preferences.is_some() {
            self.preferences = update.preferences;
        }
        if update.recent_experiences.is_some() {
            self.recent_experiences = update.recent_experiences;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_none()
            && self.background.is_none()
            && self.preferences.is_none()
            && self.recent_experiences.is_none()
    }
}

/// State kept so a recording interrupted by a disconnect can be resumed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Placeholder describing what was captured before the connection dropped
    pub partial_transcription: Option<String>,

    /// Raw audio accumulated before the connection dropped
    #[serde(with = "audio_base64")]
    pub audio_buffer: Vec<u8>,

    /// One-shot flag, cleared by the next inbound audio chunk
    pub recovering: bool,
}

impl RecoveryState {
    pub fn clear(&mut self) {
        self.partial_transcription = None;
        self.audio_buffer.clear();
        self.recovering = false;
    }
}

mod audio_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
