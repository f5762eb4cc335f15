use super::dispatch::Gateway;
use super::error::EventError;
use crate::generation::GenerationOptions;
use crate::protocol::{
    AudioChunk, ConversationStart, ManualGenerate, MessageStart, OutboundEvent,
    ResponseCountUpdate, ScenarioSupplement, SessionRef, UserModification, UserSelectedResponse,
};
use crate::session::{SessionConfig, SessionError, SessionStatus};
use crate::transcription::{NO_AUDIO_PLACEHOLDER, TRANSCRIPTION_UNAVAILABLE_PLACEHOLDER};
use tracing::{debug, info, warn};

impl Gateway {
    pub(super) async fn on_conversation_start(
        &self,
        client_id: &str,
        event: ConversationStart,
    ) -> Result<(), EventError> {
        let config = SessionConfig::new(event.scenario_description, event.response_count);
        let session = self.sessions.create(config, event.history_messages).await?;

        self.registry.link(client_id, &session.id).await;
        self.reply(
            client_id,
            OutboundEvent::SessionCreated {
                session_id: session.id.clone(),
            },
        )
        .await;
        Ok(())
    }

    pub(super) async fn on_message_start(
        &self,
        client_id: &str,
        event: MessageStart,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        // New speech makes pending suggestions stale
        let cancelled = self.coordinator.cancel_all(session_id).await;
        if cancelled > 0 {
            info!(
                "Cancelled {} requests before recording in session {}",
                cancelled, session_id
            );
        }

        let temp_id = self
            .sessions
            .try_update(session_id, |s| s.start_message(&event.sender))
            .await?;
        self.streams.start(session_id).await;

        info!(
            "Message started: {} (sender={}, temp_id={})",
            session_id, event.sender, temp_id
        );
        self.publish(
            session_id,
            OutboundEvent::status(session_id, SessionStatus::RecordingMessage, "recording message"),
        )
        .await;
        Ok(())
    }

    pub(super) async fn on_audio_chunk(
        &self,
        client_id: &str,
        chunk: AudioChunk,
    ) -> Result<(), EventError> {
        let session_id = chunk.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let total = self.streams.push_chunk(session_id, &chunk.audio).await?;

        if self.sessions.update(session_id, |s| s.clear_recovering()).await? {
            info!(
                "Audio streaming resumed after reconnect: {} ({} bytes buffered)",
                session_id, total
            );
            self.discard_snapshot(session_id).await;
        }
        Ok(())
    }

    pub(super) async fn on_message_end(
        &self,
        client_id: &str,
        event: SessionRef,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let pending = self
            .sessions
            .try_update(session_id, |s| s.begin_transcription())
            .await?;

        // A resumed recording whose stream was never re-armed still has its audio in the session
        let audio = match self.streams.finish(session_id).await {
            Some(captured) => captured.audio,
            None => self
                .sessions
                .get(session_id)
                .await
                .map(|s| s.recovery.audio_buffer)
                .unwrap_or_default(),
        };

        self.publish(
            session_id,
            OutboundEvent::status(
                session_id,
                SessionStatus::ProcessingTranscription,
                "transcribing message",
            ),
        )
        .await;

        let content = self.transcribe(session_id, &audio).await;
        let message = self
            .sessions
            .try_update(session_id, |s| s.complete_message(pending, content))
            .await?;

        info!(
            "Message recorded: {} -> {} ({} bytes of audio)",
            session_id,
            message.id,
            audio.len()
        );
        self.publish(
            session_id,
            OutboundEvent::MessageRecorded {
                session_id: session_id.to_string(),
                message_id: message.id,
                message_content: Some(message.content),
            },
        )
        .await;
        Ok(())
    }

    /// Transcribe captured audio, never failing
    async fn transcribe(&self, session_id: &str, audio: &[u8]) -> String {
        if audio.is_empty() {
            debug!("Empty recording for session {}", session_id);
            return NO_AUDIO_PLACEHOLDER.to_string();
        }

        match self.transcriber.transcribe(audio).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => NO_AUDIO_PLACEHOLDER.to_string(),
            Err(e) => {
                warn!("Transcription failed for session {}: {:#}", session_id, e);
                TRANSCRIPTION_UNAVAILABLE_PLACEHOLDER.to_string()
            }
        }
    }

    pub(super) async fn on_manual_generate(
        &self,
        client_id: &str,
        event: ManualGenerate,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let profile = event.profile();
        let profile = (!profile.is_empty()).then_some(profile);
        let options = GenerationOptions {
            focused_message_ids: event.focused_message_ids.clone(),
            user_opinion: event.user_opinion.clone(),
            profile: profile.clone(),
        };

        // Steering inputs are kept for later generations
        let status = self
            .sessions
            .update(session_id, |s| {
                if let Some(ids) = event.focused_message_ids {
                    s.set_focused_messages(ids);
                }
                if let Some(opinion) = event.user_opinion {
                    s.set_user_opinion(opinion);
                }
                if let Some(profile) = profile {
                    s.update_profile(profile);
                }
                s.status
            })
            .await?;

        self.start_generation(session_id, status, options, "generating reply suggestions")
            .await
    }

    pub(super) async fn on_user_modification(
        &self,
        client_id: &str,
        event: UserModification,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let status = self
            .sessions
            .update(session_id, |s| {
                s.add_modification(event.modification);
                s.status
            })
            .await?;

        self.start_generation(
            session_id,
            status,
            GenerationOptions::default(),
            "regenerating with modification",
        )
        .await
    }

    async fn start_generation(
        &self,
        session_id: &str,
        status: SessionStatus,
        options: GenerationOptions,
        note: &str,
    ) -> Result<(), EventError> {
        if matches!(
            status,
            SessionStatus::Idle | SessionStatus::GeneratingResponse
        ) {
            self.publish(
                session_id,
                OutboundEvent::status(session_id, SessionStatus::GeneratingResponse, note),
            )
            .await;
        }

        let request_id = self
            .coordinator
            .start_response_generation(session_id, options)
            .await?;
        debug!("Generation {} queued for session {}", request_id, session_id);
        Ok(())
    }

    pub(super) async fn on_user_selected_response(
        &self,
        client_id: &str,
        event: UserSelectedResponse,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let message = self
            .sessions
            .update(session_id, |s| {
                s.add_selected_response(event.selected_content.clone(), event.sender)
            })
            .await?;
        info!("Suggestion selected: {} -> {}", session_id, message.id);

        self.publish(
            session_id,
            OutboundEvent::MessageRecorded {
                session_id: session_id.to_string(),
                message_id: message.id,
                message_content: None,
            },
        )
        .await;

        self.publish(
            session_id,
            OutboundEvent::status(session_id, SessionStatus::GeneratingOpinion, "predicting opinion"),
        )
        .await;
        self.coordinator
            .start_opinion_prediction(session_id, event.selected_content)
            .await?;
        Ok(())
    }

    pub(super) async fn on_scenario_supplement(
        &self,
        client_id: &str,
        event: ScenarioSupplement,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        self.sessions
            .update(session_id, |s| s.update_scenario(event.supplement))
            .await?;
        info!("Scenario updated: {}", session_id);
        Ok(())
    }

    pub(super) async fn on_response_count_update(
        &self,
        client_id: &str,
        event: ResponseCountUpdate,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        self.sessions
            .try_update(session_id, |s| s.update_response_count(event.response_count))
            .await?;
        info!(
            "Response count updated: {} -> {}",
            session_id, event.response_count
        );
        Ok(())
    }

    pub(super) async fn on_conversation_end(
        &self,
        client_id: &str,
        event: SessionRef,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        self.coordinator.cancel_all(session_id).await;
        self.sessions.destroy(session_id).await;
        self.streams.discard(session_id).await;

        self.discard_snapshot(session_id).await;

        self.registry.unlink_session(session_id).await;
        info!("Conversation ended: {}", session_id);
        Ok(())
    }

    pub(super) async fn on_get_message_history(
        &self,
        client_id: &str,
        event: SessionRef,
    ) -> Result<(), EventError> {
        let session_id = event.session_id.as_str();
        self.attach(client_id, session_id).await?;

        let messages = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?
            .history_projection();

        self.reply(
            client_id,
            OutboundEvent::MessageHistoryResponse {
                session_id: session_id.to_string(),
                total_count: messages.len(),
                messages,
                request_id: uuid::Uuid::new_v4().to_string(),
            },
        )
        .await;
        Ok(())
    }
}
