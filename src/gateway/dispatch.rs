use super::config::GatewayConfig;
use super::connection::ConnectionRegistry;
use super::error::EventError;
use crate::generation::GenerationPort;
use crate::persistence::PersistenceStore;
use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};
use crate::request::{OutboundSink, RequestCoordinator};
use crate::session::{SessionError, SessionStore};
use crate::transcription::{AudioStreams, TranscriptionPort};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transport-side handle of an open connection
///
/// The transport forwards `events` to the client and stops when `shutdown`
/// fires (heartbeat timeout or server shutdown).
pub struct Connection {
    pub client_id: String,
    pub events: mpsc::Receiver<OutboundEvent>,
    pub shutdown: CancellationToken,
}

/// Entry point for every client event
///
/// Independent of the transport: a WebSocket adapter (or a test) opens a
/// connection, feeds it text frames through [`Gateway::handle_frame`] and
/// closes it with [`Gateway::close_connection`]. Frames of one connection
/// must be fed in arrival order, one at a time.
pub struct Gateway {
    pub(super) config: GatewayConfig,
    pub(super) sessions: Arc<SessionStore>,
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) coordinator: RequestCoordinator,
    pub(super) streams: AudioStreams,
    pub(super) transcriber: Arc<dyn TranscriptionPort>,
    pub(super) persistence: Option<Arc<PersistenceStore>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        sessions: Arc<SessionStore>,
        transcriber: Arc<dyn TranscriptionPort>,
        generator: Arc<dyn GenerationPort>,
        max_audio_bytes: usize,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink: Arc<dyn OutboundSink> = registry.clone();
        let coordinator = RequestCoordinator::new(sessions.clone(), generator, sink);

        info!(
            "Gateway ready (transcription={}, timeout={}s, heartbeat every {}s)",
            transcriber.name(),
            config.connection_timeout_secs,
            config.heartbeat_interval_secs
        );

        Self {
            config,
            sessions,
            registry,
            coordinator,
            streams: AudioStreams::new(max_audio_bytes),
            transcriber,
            persistence: None,
        }
    }

    /// Save sessions on disconnect and reload them on resume
    pub fn with_persistence(mut self, store: Arc<PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn streams(&self) -> &AudioStreams {
        &self.streams
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceStore>> {
        self.persistence.as_ref()
    }

    /// Register a new connection and hand its outbound side to the transport
    pub async fn open_connection(&self) -> Connection {
        let client_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let shutdown = CancellationToken::new();

        self.registry
            .register(&client_id, tx, shutdown.clone())
            .await;
        info!("Connection opened: {}", client_id);

        Connection {
            client_id,
            events: rx,
            shutdown,
        }
    }

    /// Decode and dispatch one text frame
    ///
    /// Failures are answered with an `error` event; the connection stays open.
    pub async fn handle_frame(&self, client_id: &str, frame: &str) {
        if !self.registry.touch(client_id, Instant::now()).await {
            warn!("Frame from unknown connection {} ignored", client_id);
            return;
        }

        let (session_id, result) = match InboundEvent::decode(frame) {
            Ok(event) => {
                debug!("Event {} from {}", event.kind(), client_id);
                let session_id = event.session_id().map(str::to_string);
                (session_id, self.dispatch(client_id, event).await)
            }
            Err(e) => (None, Err(e.into())),
        };

        if let Err(err) = result {
            self.report(client_id, session_id, err).await;
        }
    }

    async fn dispatch(&self, client_id: &str, event: InboundEvent) -> Result<(), EventError> {
        match event {
            InboundEvent::ConversationStart(e) => self.on_conversation_start(client_id, e).await,
            InboundEvent::MessageStart(e) => self.on_message_start(client_id, e).await,
            InboundEvent::AudioStream(e) => self.on_audio_chunk(client_id, e).await,
            InboundEvent::MessageEnd(e) => self.on_message_end(client_id, e).await,
            InboundEvent::ManualGenerate(e) => self.on_manual_generate(client_id, e).await,
            InboundEvent::UserModification(e) => self.on_user_modification(client_id, e).await,
            InboundEvent::UserSelectedResponse(e) => {
                self.on_user_selected_response(client_id, e).await
            }
            InboundEvent::ScenarioSupplement(e) => self.on_scenario_supplement(client_id, e).await,
            InboundEvent::ResponseCountUpdate(e) => {
                self.on_response_count_update(client_id, e).await
            }
            InboundEvent::ConversationEnd(e) => self.on_conversation_end(client_id, e).await,
            InboundEvent::SessionResume(e) => self.on_session_resume(client_id, e).await,
            InboundEvent::GetMessageHistory(e) => self.on_get_message_history(client_id, e).await,
        }
    }

    async fn report(&self, client_id: &str, session_id: Option<String>, err: EventError) {
        self.registry.record_error(client_id).await;

        // Internal errors are only described in the logs
        let details = match &err {
            EventError::Internal(e) => {
                error!("Internal error handling event from {}: {:?}", client_id, e);
                None
            }
            EventError::Protocol(ProtocolError::InvalidData { event, .. }) => {
                warn!("Rejected event from {}: {}", client_id, err);
                Some(format!("event type: {}", event))
            }
            other => {
                warn!("Rejected event from {}: {}", client_id, other);
                None
            }
        };

        let session_id = match &err {
            EventError::Session(SessionError::NotFound(id)) => Some(id.clone()),
            _ => session_id,
        };

        self.reply(
            client_id,
            OutboundEvent::Error {
                session_id,
                error_code: err.code(),
                message: err.client_message(),
                details,
            },
        )
        .await;
    }

    /// Send an event to one connection
    pub(super) async fn reply(&self, client_id: &str, event: OutboundEvent) {
        self.registry.send_to(client_id, event).await;
    }

    /// Send an event to every connection subscribed to the session
    pub(super) async fn publish(&self, session_id: &str, event: OutboundEvent) {
        self.registry.deliver(session_id, event).await;
    }

    /// Fail with `SESSION_NOT_FOUND` unless the session is resident, then
    /// subscribe the connection to it
    pub(super) async fn attach(&self, client_id: &str, session_id: &str) -> Result<(), EventError> {
        if !self.sessions.contains(session_id).await {
            return Err(SessionError::NotFound(session_id.to_string()).into());
        }
        self.registry.link(client_id, session_id).await;
        Ok(())
    }

    /// Stop background work and close every connection
    ///
    /// Connections get the regular disconnect handling, so interrupted
    /// recordings are saved.
    pub async fn shutdown(&self) {
        for client_id in self.registry.client_ids().await {
            self.close_connection(&client_id).await;
        }
        self.coordinator.shutdown().await;
        info!("Gateway shut down");
    }
}
