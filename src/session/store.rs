use super::config::SessionConfig;
use super::error::SessionError;
use super::message::HistoryMessage;
use super::session::Session;
use super::stats::SessionSummary;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Owner of every live session, keyed by session id
///
/// All mutation goes through [`SessionStore::update`] / [`SessionStore::try_update`],
/// which run a synchronous closure under the write lock. A read-modify-write
/// therefore never interleaves with another one on the same session.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh id
    pub async fn create(
        &self,
        config: SessionConfig,
        history_messages: Vec<HistoryMessage>,
    ) -> Result<Session, SessionError> {
        self.create_with_id(uuid::Uuid::new_v4().to_string(), config, history_messages)
            .await
    }

    pub async fn create_with_id(
        &self,
        session_id: String,
        config: SessionConfig,
        history_messages: Vec<HistoryMessage>,
    ) -> Result<Session, SessionError> {
        if !SessionConfig::is_valid_response_count(config.response_count) {
            return Err(SessionError::InvalidResponseCount(config.response_count));
        }

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyExists(session_id));
        }

        let session = Session::new(session_id.clone(), config, history_messages);
        sessions.insert(session_id.clone(), session.clone());

        info!(
            "Session created: {} (scenario={}, response_count={}, history={})",
            session_id,
            session.config.scenario_description.is_some(),
            session.config.response_count,
            session.history_messages.len()
        );

        Ok(session)
    }

    /// Copy of the current state of a session
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Apply an infallible mutation to a session
    pub async fn update<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SessionError> {
        self.try_update(session_id, |session| Ok(f(session))).await
    }

    /// Apply a fallible mutation to a session
    ///
    /// The closure runs to completion under the store lock.
    pub async fn try_update<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let result = f(session);
        debug_assert!(session.is_consistent(), "session {} inconsistent", session_id);
        result
    }

    /// Insert a session loaded from a snapshot
    ///
    /// Returns false, leaving the resident copy untouched, if the id is already live.
    pub async fn restore(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return false;
        }
        info!("Session restored into store: {}", session.id);
        sessions.insert(session.id.clone(), session);
        true
    }

    pub async fn destroy(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            info!("Session destroyed: {}", session_id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(SessionSummary::from)
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionSummary::from)
            .collect()
    }

    /// Destroy sessions not updated within `max_age`, returning their ids
    pub async fn cleanup_expired(&self, max_age: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.id.clone())
            .collect();

        for session_id in &expired {
            sessions.remove(session_id);
            debug!("Expired session removed: {}", session_id);
        }

        if !expired.is_empty() {
            info!("Cleaned up {} expired sessions", expired.len());
        }

        expired
    }
}
