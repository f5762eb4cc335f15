use super::info::{RequestInfo, RequestKind, RequestStats, RequestStatus};
use super::sink::OutboundSink;
use crate::generation::{
    fallback_replies, normalize_replies, opinion_prompt, reply_prompt, GenerationOptions,
    GenerationPort, OpinionPrediction,
};
use crate::protocol::OutboundEvent;
use crate::session::{SessionError, SessionStore};
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct TrackedTask {
    request_id: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    total: u64,
    completed: u64,
    cancelled: u64,
    failed: u64,
}

/// Everything the coordinator tracks, guarded by one lock
///
/// Lock order is coordinator state first, then the session store. Session
/// store closures are synchronous, so the reverse order cannot happen.
#[derive(Default)]
struct CoordinatorState {
    requests: HashMap<String, RequestInfo>,
    tasks: HashMap<(String, RequestKind), TrackedTask>,
    counters: Counters,
}

impl CoordinatorState {
    fn register(&mut self, info: RequestInfo) {
        self.counters.total += 1;
        self.requests.insert(info.id.clone(), info);
    }

    fn track(&mut self, session_id: &str, kind: RequestKind, request_id: String, handle: JoinHandle<()>) {
        self.tasks.insert(
            (session_id.to_string(), kind),
            TrackedTask { request_id, handle },
        );
    }

    /// Cancel the tracked request of one kind, returning its id
    fn cancel(&mut self, session_id: &str, kind: RequestKind) -> Option<String> {
        let task = self.tasks.remove(&(session_id.to_string(), kind))?;
        task.handle.abort();

        if let Some(info) = self.requests.get_mut(&task.request_id) {
            if info.finish(RequestStatus::Cancelled, None) {
                self.counters.cancelled += 1;
            }
        }
        Some(task.request_id)
    }

    /// Pending -> Running; false when the request was cancelled before it started
    fn mark_running(&mut self, request_id: &str) -> bool {
        match self.requests.get_mut(request_id) {
            Some(info) if info.status == RequestStatus::Pending => {
                info.status = RequestStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Terminal transition made by the task itself
    ///
    /// Returns false if the request already reached a terminal state, in
    /// which case its result must be dropped.
    fn settle(
        &mut self,
        request_id: &str,
        status: RequestStatus,
        error_message: Option<String>,
    ) -> Option<RequestInfo> {
        let info = self.requests.get_mut(request_id)?;
        if !info.finish(status, error_message) {
            return None;
        }
        let info = info.clone();

        match status {
            RequestStatus::Completed => self.counters.completed += 1,
            RequestStatus::Failed => self.counters.failed += 1,
            RequestStatus::Cancelled => self.counters.cancelled += 1,
            RequestStatus::Pending | RequestStatus::Running => {}
        }

        let key = (info.session_id.clone(), info.kind);
        if self
            .tasks
            .get(&key)
            .is_some_and(|t| t.request_id == request_id)
        {
            self.tasks.remove(&key);
        }
        Some(info)
    }
}

/// Runs generation work in the background, at most one task per
/// (session, kind) pair
///
/// Starting a response request cancels every request of the session;
/// starting an opinion prediction cancels only the previous prediction.
/// Results are pushed through the [`OutboundSink`] to whoever is subscribed
/// to the session when the work finishes.
#[derive(Clone)]
pub struct RequestCoordinator {
    sessions: Arc<SessionStore>,
    generator: Arc<dyn GenerationPort>,
    sink: Arc<dyn OutboundSink>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl RequestCoordinator {
    pub fn new(
        sessions: Arc<SessionStore>,
        generator: Arc<dyn GenerationPort>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        info!("Request coordinator using generation engine: {}", generator.name());
        Self {
            sessions,
            generator,
            sink,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    /// Start generating reply suggestions, returning the request id
    pub async fn start_response_generation(
        &self,
        session_id: &str,
        options: GenerationOptions,
    ) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;

        let previous_response = state.cancel(session_id, RequestKind::Response);
        let previous_opinion = state.cancel(session_id, RequestKind::OpinionPrediction);

        let request = RequestInfo::new(session_id, RequestKind::Response);
        let request_id = request.id.clone();

        self.sessions
            .update(session_id, |session| {
                if let Some(id) = &previous_opinion {
                    session.finish_opinion_prediction(id);
                }
                if let Some(id) = &previous_response {
                    session.finish_response_generation(id, false);
                }
                session.begin_response_generation(&request_id);
            })
            .await?;

        state.register(request);
        let work = self
            .clone()
            .run_response(session_id.to_string(), request_id.clone(), options);
        let handle = self.spawn_request(request_id.clone(), work);
        state.track(session_id, RequestKind::Response, request_id.clone(), handle);
        drop(state);

        info!(
            "Response request {} started for session {} (superseded: {})",
            request_id,
            session_id,
            previous_response.is_some() || previous_opinion.is_some()
        );
        Ok(request_id)
    }

    /// Start predicting the user's stance after they picked a suggestion
    pub async fn start_opinion_prediction(
        &self,
        session_id: &str,
        selected_content: String,
    ) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;

        let previous = state.cancel(session_id, RequestKind::OpinionPrediction);
        let request = RequestInfo::new(session_id, RequestKind::OpinionPrediction);
        let request_id = request.id.clone();

        self.sessions
            .update(session_id, |session| {
                if let Some(id) = &previous {
                    session.finish_opinion_prediction(id);
                }
                session.begin_opinion_prediction(&request_id);
            })
            .await?;

        state.register(request);
        let work = self.clone().run_opinion(
            session_id.to_string(),
            request_id.clone(),
            selected_content,
        );
        let handle = self.spawn_request(request_id.clone(), work);
        state.track(
            session_id,
            RequestKind::OpinionPrediction,
            request_id.clone(),
            handle,
        );
        drop(state);

        info!(
            "Opinion prediction {} started for session {}",
            request_id, session_id
        );
        Ok(request_id)
    }

    /// Cancel the in-flight request of one kind, returning its id
    pub async fn cancel(&self, session_id: &str, kind: RequestKind) -> Option<String> {
        let mut state = self.state.lock().await;
        let request_id = state.cancel(session_id, kind)?;
        self.unlink(session_id, kind, &request_id).await;
        drop(state);

        info!("Cancelled {} request {} for session {}", kind, request_id, session_id);
        Some(request_id)
    }

    /// Cancel every in-flight request of a session
    pub async fn cancel_all(&self, session_id: &str) -> usize {
        let mut cancelled = 0;
        for kind in [RequestKind::Response, RequestKind::OpinionPrediction] {
            if self.cancel(session_id, kind).await.is_some() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel every in-flight request of every session
    pub async fn cancel_all_global(&self) -> usize {
        let keys: Vec<(String, RequestKind)> =
            self.state.lock().await.tasks.keys().cloned().collect();

        let mut cancelled = 0;
        for (session_id, kind) in keys {
            if self.cancel(&session_id, kind).await.is_some() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn request_info(&self, request_id: &str) -> Option<RequestInfo> {
        self.state.lock().await.requests.get(request_id).cloned()
    }

    /// Every request recorded for a session, oldest first
    pub async fn session_requests(&self, session_id: &str) -> Vec<RequestInfo> {
        let state = self.state.lock().await;
        let mut requests: Vec<RequestInfo> = state
            .requests
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    pub async fn active_requests(&self) -> Vec<RequestInfo> {
        let state = self.state.lock().await;
        state
            .requests
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Whether the session has any request in flight
    pub async fn is_session_busy(&self, session_id: &str) -> bool {
        self.state
            .lock()
            .await
            .tasks
            .keys()
            .any(|(id, _)| id == session_id)
    }

    pub async fn statistics(&self) -> RequestStats {
        let state = self.state.lock().await;
        let counters = &state.counters;

        let active_of = |kind: RequestKind| state.tasks.keys().filter(|(_, k)| *k == kind).count();
        let success_rate = if counters.total == 0 {
            0.0
        } else {
            counters.completed as f64 / counters.total as f64
        };

        RequestStats {
            total_requests: counters.total,
            completed_requests: counters.completed,
            cancelled_requests: counters.cancelled,
            failed_requests: counters.failed,
            active_response_requests: active_of(RequestKind::Response),
            active_opinion_requests: active_of(RequestKind::OpinionPrediction),
            tracked_requests: state.requests.len(),
            success_rate,
        }
    }

    /// Forget terminal requests that finished more than `retention` ago
    pub async fn prune_finished(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut state = self.state.lock().await;
        let before = state.requests.len();

        state
            .requests
            .retain(|_, r| r.is_active() || r.completed_at.is_some_and(|t| t >= cutoff));

        let pruned = before - state.requests.len();
        if pruned > 0 {
            debug!("Pruned {} finished requests", pruned);
        }
        pruned
    }

    /// Periodically prune finished requests until `shutdown` fires
    pub fn spawn_pruner(
        &self,
        every: Duration,
        retention: chrono::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.prune_finished(retention).await;
                    }
                }
            }
            debug!("Request pruner stopped");
        })
    }

    /// Cancel all outstanding work
    pub async fn shutdown(&self) {
        let cancelled = self.cancel_all_global().await;
        info!("Request coordinator shut down ({} requests cancelled)", cancelled);
    }

    // ------------------------------------------------------------------
    // Task bodies
    // ------------------------------------------------------------------

    fn spawn_request<F>(&self, request_id: String, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let failure = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic),
            };
            coordinator.fail(&request_id, failure).await;
        })
    }

    async fn run_response(
        self,
        session_id: String,
        request_id: String,
        options: GenerationOptions,
    ) -> Result<()> {
        let started = self.state.lock().await.mark_running(&request_id);
        if !started {
            debug!("Request {} cancelled before it started", request_id);
            return Ok(());
        }

        let session = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| anyhow!("session {} no longer exists", session_id))?;
        let count = usize::from(session.config.response_count);
        let prompt = reply_prompt(&session, &options);

        let suggestions = match self.generator.generate(&prompt, count).await {
            Ok(replies) => normalize_replies(replies, count),
            Err(e) => {
                warn!(
                    "Generation failed for request {}, using fallback replies: {:#}",
                    request_id, e
                );
                fallback_replies(count)
            }
        };

        // Held until delivery so no newer request can start in between
        let mut state = self.state.lock().await;
        if state
            .settle(&request_id, RequestStatus::Completed, None)
            .is_none()
        {
            debug!("Request {} was superseded, dropping result", request_id);
            return Ok(());
        }

        if let Err(e) = self
            .sessions
            .update(&session_id, |s| s.finish_response_generation(&request_id, true))
            .await
        {
            debug!("Session gone before request {} finished: {}", request_id, e);
        }

        let reached = self
            .sink
            .deliver(
                &session_id,
                OutboundEvent::LlmResponse {
                    session_id: session_id.clone(),
                    suggestions,
                    request_id: request_id.clone(),
                },
            )
            .await;
        drop(state);

        info!(
            "Response request {} completed for session {} ({} clients)",
            request_id, session_id, reached
        );
        Ok(())
    }

    async fn run_opinion(
        self,
        session_id: String,
        request_id: String,
        selected_content: String,
    ) -> Result<()> {
        let started = self.state.lock().await.mark_running(&request_id);
        if !started {
            debug!("Request {} cancelled before it started", request_id);
            return Ok(());
        }

        let session = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| anyhow!("session {} no longer exists", session_id))?;
        let prompt = opinion_prompt(&session, &selected_content);

        let prediction = match self.generator.generate(&prompt, 1).await {
            Ok(candidates) => OpinionPrediction::parse(&candidates).unwrap_or_else(|| {
                debug!("Unparseable opinion output for request {}", request_id);
                OpinionPrediction::neutral()
            }),
            Err(e) => {
                warn!("Opinion prediction {} failed: {:#}", request_id, e);
                OpinionPrediction::neutral()
            }
        };

        let mut state = self.state.lock().await;
        if state
            .settle(&request_id, RequestStatus::Completed, None)
            .is_none()
        {
            debug!("Opinion prediction {} was superseded", request_id);
            return Ok(());
        }

        if let Err(e) = self
            .sessions
            .update(&session_id, |s| s.finish_opinion_prediction(&request_id))
            .await
        {
            debug!("Session gone before request {} finished: {}", request_id, e);
        }

        self.sink
            .deliver(
                &session_id,
                OutboundEvent::OpinionPredictionResponse {
                    session_id: session_id.clone(),
                    prediction,
                    request_id: request_id.clone(),
                },
            )
            .await;
        drop(state);

        info!("Opinion prediction {} completed", request_id);
        Ok(())
    }

    async fn fail(&self, request_id: &str, message: String) {
        let mut state = self.state.lock().await;
        let Some(info) = state.settle(request_id, RequestStatus::Failed, Some(message.clone()))
        else {
            return;
        };

        error!("Request {} failed: {}", request_id, message);
        self.unlink(&info.session_id, info.kind, request_id).await;

        // Clients still get a payload of the usual shape
        let Some(session) = self.sessions.get(&info.session_id).await else {
            return;
        };
        let event = match info.kind {
            RequestKind::Response => OutboundEvent::LlmResponse {
                session_id: session.id.clone(),
                suggestions: fallback_replies(usize::from(session.config.response_count)),
                request_id: request_id.to_string(),
            },
            RequestKind::OpinionPrediction => OutboundEvent::OpinionPredictionResponse {
                session_id: session.id.clone(),
                prediction: OpinionPrediction::neutral(),
                request_id: request_id.to_string(),
            },
        };
        self.sink.deliver(&session.id, event).await;
        drop(state);
    }

    async fn unlink(&self, session_id: &str, kind: RequestKind, request_id: &str) {
        let result = self
            .sessions
            .update(session_id, |session| match kind {
                RequestKind::Response => session.finish_response_generation(request_id, false),
                RequestKind::OpinionPrediction => session.finish_opinion_prediction(request_id),
            })
            .await;

        if let Err(e) = result {
            debug!("Could not unlink request {}: {}", request_id, e);
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = panic.downcast_ref::<String>() {
        return s.clone();
    }
    "request task panicked".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(kind: RequestKind) -> (CoordinatorState, String) {
        let mut state = CoordinatorState::default();
        let info = RequestInfo::new("s1", kind);
        let id = info.id.clone();
        state.register(info);
        (state, id)
    }

    #[test]
    fn test_settle_is_terminal_once() {
        let (mut state, id) = state_with(RequestKind::Response);
        assert!(state.mark_running(&id));

        assert!(state.settle(&id, RequestStatus::Completed, None).is_some());
        assert!(state
            .settle(&id, RequestStatus::Failed, Some("late".to_string()))
            .is_none());

        assert_eq!(state.requests[&id].status, RequestStatus::Completed);
        assert_eq!(state.counters.completed, 1);
        assert_eq!(state.counters.failed, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_running_blocks_start() {
        let (mut state, id) = state_with(RequestKind::OpinionPrediction);
        let handle = tokio::spawn(async {});
        state.track("s1", RequestKind::OpinionPrediction, id.clone(), handle);

        assert_eq!(
            state.cancel("s1", RequestKind::OpinionPrediction),
            Some(id.clone())
        );
        assert!(!state.mark_running(&id));
        assert_eq!(state.requests[&id].status, RequestStatus::Cancelled);
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn test_panic_message_extracts_text() {
        let panic: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(panic), "boom");
    }
}
