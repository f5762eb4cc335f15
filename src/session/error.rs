use thiserror::Error;

use super::SessionStatus;

/// Errors raised by session mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("no message in progress for session {0}")]
    NoMessageInProgress(String),

    #[error("session {session_id} cannot {action} while {status}")]
    InvalidState {
        session_id: String,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("response count must be between 1 and 5, got {0}")]
    InvalidResponseCount(u8),
}
