use crate::protocol::{ErrorCode, ProtocolError};
use crate::session::SessionError;
use crate::transcription::StreamError;
use thiserror::Error;

/// Failure while handling one inbound event
///
/// Every variant maps to a stable [`ErrorCode`]; the connection stays open.
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl EventError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EventError::Protocol(ProtocolError::UnknownEventType(_)) => ErrorCode::InvalidEventType,
            EventError::Protocol(_) => ErrorCode::InvalidEventData,
            EventError::Session(SessionError::NotFound(_)) => ErrorCode::SessionNotFound,
            EventError::Session(SessionError::InvalidResponseCount(_)) => {
                ErrorCode::InvalidEventData
            }
            EventError::Session(_) => ErrorCode::InvalidSessionState,
            EventError::Stream(_) => ErrorCode::SttServiceError,
            EventError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Client-facing summary; internal details stay in the logs
    pub fn client_message(&self) -> String {
        match self {
            EventError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
