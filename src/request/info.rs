use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind of background work a session can have in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Low priority stance prediction after the user picks a suggestion
    OpinionPrediction,
    /// Reply suggestions; preempts everything else for the session
    Response,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::OpinionPrediction => f.write_str("opinion_prediction"),
            RequestKind::Response => f.write_str("response"),
        }
    }
}

/// Lifecycle state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Cancelled | RequestStatus::Failed
        )
    }
}

/// Bookkeeping for one background request
///
/// References its session by id only; the session may be gone by the time
/// the request finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub id: String,
    pub session_id: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RequestInfo {
    pub fn new(session_id: &str, kind: RequestKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move to a terminal state; a request already terminal is left as is
    pub fn finish(&mut self, status: RequestStatus, error_message: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
        true
    }
}

/// Aggregate counters reported by the coordinator
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub cancelled_requests: u64,
    pub failed_requests: u64,
    pub active_response_requests: usize,
    pub active_opinion_requests: usize,
    pub tracked_requests: usize,
    pub success_rate: f64,
}
