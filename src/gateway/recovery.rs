use super::dispatch::Gateway;
use super::error::EventError;
use crate::persistence::is_valid_session_id;
use crate::protocol::{OutboundEvent, SessionRef};
use crate::session::{SessionError, SessionStatus};
use tracing::{debug, info, warn};

/// Prefix marking a partial transcription that survived a disconnect
pub const RECOVERED_PREFIX: &str = "[recovered] ";

fn partial_placeholder(chunks: usize, bytes: usize) -> String {
    format!(
        "partial recording: {} audio chunks ({} bytes) received before disconnect",
        chunks, bytes
    )
}

impl Gateway {
    /// Tear down a connection and run disconnect handling for its sessions
    ///
    /// Returns false if the connection was already gone; disconnect handling
    /// runs at most once per connection.
    pub async fn close_connection(&self, client_id: &str) -> bool {
        let Some(record) = self.registry.remove(client_id).await else {
            return false;
        };
        record.close();

        info!(
            "Connection closed: {} ({} messages, {} errors, {} sessions)",
            client_id,
            record.message_count,
            record.error_count,
            record.session_ids.len()
        );

        for session_id in &record.session_ids {
            if self.registry.has_subscribers(session_id).await {
                debug!(
                    "Session {} still has other clients, skipping disconnect handling",
                    session_id
                );
                continue;
            }
            self.handle_disconnect(session_id).await;
        }
        true
    }

    /// Cancel stale work, freeze an interrupted recording and save the session
    async fn handle_disconnect(&self, session_id: &str) {
        if !self.sessions.contains(session_id).await {
            return;
        }

        let cancelled = self.coordinator.cancel_all(session_id).await;
        let captured = self.streams.suspend(session_id).await;

        let frozen = self
            .sessions
            .update(session_id, |s| {
                if s.status != SessionStatus::RecordingMessage {
                    return None;
                }
                let (audio, chunks) = match captured {
                    Some(c) => (c.audio, c.chunk_count),
                    None => (s.recovery.audio_buffer.clone(), 0),
                };
                let bytes = audio.len();
                s.freeze_recording(audio, partial_placeholder(chunks, bytes));
                Some(bytes)
            })
            .await;

        match frozen {
            Ok(Some(bytes)) => info!(
                "Recording paused by disconnect: {} ({} bytes kept, {} requests cancelled)",
                session_id, bytes, cancelled
            ),
            Ok(None) => debug!(
                "Disconnect handled for {} ({} requests cancelled)",
                session_id, cancelled
            ),
            Err(e) => {
                debug!("Session vanished during disconnect: {}", e);
                return;
            }
        }

        self.save_session(session_id).await;
    }

    /// Best-effort snapshot of a session
    pub(super) async fn save_session(&self, session_id: &str) {
        let Some(store) = &self.persistence else {
            return;
        };
        let Some(session) = self.sessions.get(session_id).await else {
            return;
        };
        if let Err(e) = store.save(&session).await {
            warn!("Failed to persist session {}: {:#}", session_id, e);
        }
    }

    /// Best-effort removal of a snapshot that no longer describes the session
    pub(super) async fn discard_snapshot(&self, session_id: &str) {
        let Some(store) = &self.persistence else {
            return;
        };
        if let Err(e) = store.delete(session_id).await {
            warn!("Failed to delete snapshot of {}: {:#}", session_id, e);
        }
    }

    pub(super) async fn on_session_resume(
        &self,
        client_id: &str,
        event: SessionRef,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();

        let mut from_snapshot = false;
        if !self.sessions.contains(session_id).await {
            let store = self
                .persistence
                .as_ref()
                .filter(|_| is_valid_session_id(session_id))
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            let session = store
                .load(session_id)
                .await?
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            from_snapshot = self.sessions.restore(session).await;
        }

        let session = self
            .sessions
            .update(session_id, |s| {
                // Request ids in a snapshot belong to another process
                if from_snapshot {
                    s.reset_request_links();
                }
                s.clone()
            })
            .await?;

        self.registry.link(client_id, session_id).await;
        info!(
            "Session resumed: {} (status={}, from_snapshot={})",
            session_id, session.status, from_snapshot
        );
        self.reply(client_id, OutboundEvent::restored(&session)).await;

        if session.status != SessionStatus::RecordingMessage {
            // Nothing left to recover; the resident session is authoritative
            self.discard_snapshot(session_id).await;
            return Ok(());
        }

        let preloaded = session.recovery.audio_buffer.clone();
        let bytes = preloaded.len();
        if !self.streams.resume(session_id, preloaded).await {
            // Another client is still streaming into this recording
            self.reply(
                client_id,
                OutboundEvent::status(
                    session_id,
                    SessionStatus::RecordingMessage,
                    "recording in progress",
                ),
            )
            .await;
            return Ok(());
        }

        // Cleared, and the snapshot dropped, by the next audio chunk
        self.sessions
            .update(session_id, |s| s.mark_recovering())
            .await?;

        let partial = session
            .recovery
            .partial_transcription
            .clone()
            .unwrap_or_else(|| partial_placeholder(0, bytes));
        self.reply(
            client_id,
            OutboundEvent::PartialTranscription {
                session_id: session_id.to_string(),
                text: format!("{}{}", RECOVERED_PREFIX, partial),
                recovered: true,
            },
        )
        .await;
        self.reply(
            client_id,
            OutboundEvent::status(
                session_id,
                SessionStatus::RecordingMessage,
                "recording resumed, continue streaming audio",
            ),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_placeholder_mentions_sizes() {
        let text = partial_placeholder(3, 4096);
        assert!(text.contains("3 audio chunks"));
        assert!(text.contains("4096 bytes"));
    }
}
