// Integration tests for the request coordinator
//
// Generation runs against in-process generators and results are collected
// by a recording sink, so every delivered event can be inspected.

use anyhow::{bail, Result};
use async_trait::async_trait;
use convo_assist::generation::{fallback_replies, GenerationOptions, OpinionPrediction, Prompt};
use convo_assist::request::OutboundSink;
use convo_assist::session::{SessionConfig, SessionStatus, SessionStore};
use convo_assist::{
    GenerationPort, MockGenerator, OutboundEvent, RequestCoordinator, RequestKind, RequestStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, OutboundEvent)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<(String, OutboundEvent)> {
        self.events.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<(String, OutboundEvent)> {
        for _ in 0..400 {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn deliver(&self, session_id: &str, event: OutboundEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event));
        1
    }
}

/// Holds every delivery until the test hands out a permit
struct GatedSink {
    entered: Notify,
    gate: Semaphore,
    events: Mutex<Vec<(String, OutboundEvent)>>,
}

impl GatedSink {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            gate: Semaphore::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    fn request_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, event)| match event {
                OutboundEvent::LlmResponse { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl OutboundSink for GatedSink {
    async fn deliver(&self, session_id: &str, event: OutboundEvent) -> usize {
        self.entered.notify_one();
        self.gate.acquire().await.unwrap().forget();
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event));
        1
    }
}

/// Always errors, like an unreachable model endpoint
struct FailingGenerator;

#[async_trait]
impl GenerationPort for FailingGenerator {
    async fn generate(&self, _prompt: &Prompt, _count: usize) -> Result<Vec<String>> {
        bail!("model endpoint unreachable")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Panics inside the request task
struct PanickingGenerator;

#[async_trait]
impl GenerationPort for PanickingGenerator {
    async fn generate(&self, _prompt: &Prompt, _count: usize) -> Result<Vec<String>> {
        panic!("generator exploded")
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

struct Harness {
    sessions: Arc<SessionStore>,
    sink: Arc<RecordingSink>,
    coordinator: RequestCoordinator,
}

fn harness(generator: Arc<dyn GenerationPort>) -> Harness {
    let sessions = Arc::new(SessionStore::new());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = RequestCoordinator::new(sessions.clone(), generator, sink.clone());
    Harness {
        sessions,
        sink,
        coordinator,
    }
}

async fn wait_until_idle(coordinator: &RequestCoordinator, session_id: &str) {
    for _ in 0..400 {
        if !coordinator.is_session_busy(session_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn suggestions(event: &OutboundEvent) -> Vec<String> {
    match event {
        OutboundEvent::LlmResponse { suggestions, .. } => suggestions.clone(),
        other => panic!("expected llm_response, got {}", other.event_type()),
    }
}

#[tokio::test]
async fn test_response_count_is_honoured() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::ZERO)));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    // Default count
    h.coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let events = h.sink.wait_for(1).await;
    assert_eq!(suggestions(&events[0].1).len(), 3);

    // Raised count applies to the next request
    wait_until_idle(&h.coordinator, &session.id).await;
    h.sessions
        .try_update(&session.id, |s| s.update_response_count(5))
        .await?;
    h.coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let events = h.sink.wait_for(2).await;
    assert_eq!(suggestions(&events[1].1).len(), 5);

    Ok(())
}

#[tokio::test]
async fn test_completion_clears_modifications_and_link() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::ZERO)));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;
    h.sessions
        .update(&session.id, |s| s.add_modification("shorter".to_string()))
        .await?;

    let request_id = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let events = h.sink.wait_for(1).await;
    wait_until_idle(&h.coordinator, &session.id).await;

    match &events[0].1 {
        OutboundEvent::LlmResponse { request_id: id, .. } => assert_eq!(id, &request_id),
        other => panic!("unexpected event {}", other.event_type()),
    }

    let session = h.sessions.get(&session.id).await.unwrap();
    assert!(session.modifications.is_empty());
    assert!(session.active_response_request_id.is_none());
    assert_eq!(session.status, SessionStatus::Idle);

    let info = h.coordinator.request_info(&request_id).await.unwrap();
    assert_eq!(info.status, RequestStatus::Completed);
    assert!(info.completed_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_newer_request_supersedes_older() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::from_millis(100))));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    let first = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let second = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;

    h.sink.wait_for(1).await;
    wait_until_idle(&h.coordinator, &session.id).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Only the second request delivers
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    match &events[0].1 {
        OutboundEvent::LlmResponse { request_id, .. } => assert_eq!(request_id, &second),
        other => panic!("unexpected event {}", other.event_type()),
    }

    let first_info = h.coordinator.request_info(&first).await.unwrap();
    assert_eq!(first_info.status, RequestStatus::Cancelled);

    Ok(())
}

#[tokio::test]
async fn test_response_request_cancels_opinion_prediction() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::from_millis(200))));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    let opinion = h
        .coordinator
        .start_opinion_prediction(&session.id, "Sounds good".to_string())
        .await?;
    h.coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;

    let info = h.coordinator.request_info(&opinion).await.unwrap();
    assert_eq!(info.status, RequestStatus::Cancelled);

    let session = h.sessions.get(&session.id).await.unwrap();
    assert!(session.active_opinion_request_id.is_none());
    assert!(session.active_response_request_id.is_some());

    Ok(())
}

#[tokio::test]
async fn test_cancel_marks_request_cancelled() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::from_secs(5))));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    let request_id = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    assert!(h.coordinator.is_session_busy(&session.id).await);

    let cancelled = h.coordinator.cancel(&session.id, RequestKind::Response).await;
    assert_eq!(cancelled.as_deref(), Some(request_id.as_str()));
    assert!(!h.coordinator.is_session_busy(&session.id).await);

    // Cancelling again finds nothing
    assert!(h
        .coordinator
        .cancel(&session.id, RequestKind::Response)
        .await
        .is_none());

    let info = h.coordinator.request_info(&request_id).await.unwrap();
    assert_eq!(info.status, RequestStatus::Cancelled);

    let session = h.sessions.get(&session.id).await.unwrap();
    assert!(session.active_response_request_id.is_none());
    assert_eq!(session.status, SessionStatus::Idle);
    assert!(h.sink.events().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_generation_error_uses_fallback_replies() -> Result<()> {
    let h = harness(Arc::new(FailingGenerator));
    let session = h
        .sessions
        .create(SessionConfig::new(None, 2), Vec::new())
        .await?;

    let request_id = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let events = h.sink.wait_for(1).await;

    assert_eq!(suggestions(&events[0].1), fallback_replies(2));
    wait_until_idle(&h.coordinator, &session.id).await;
    let info = h.coordinator.request_info(&request_id).await.unwrap();
    assert_eq!(info.status, RequestStatus::Completed);

    Ok(())
}

#[tokio::test]
async fn test_panicking_task_fails_with_fallback() -> Result<()> {
    let h = harness(Arc::new(PanickingGenerator));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    let request_id = h
        .coordinator
        .start_opinion_prediction(&session.id, "Let's do it".to_string())
        .await?;
    let events = h.sink.wait_for(1).await;

    match &events[0].1 {
        OutboundEvent::OpinionPredictionResponse { prediction, .. } => {
            assert_eq!(prediction, &OpinionPrediction::neutral());
        }
        other => panic!("unexpected event {}", other.event_type()),
    }

    let info = h.coordinator.request_info(&request_id).await.unwrap();
    assert_eq!(info.status, RequestStatus::Failed);
    assert!(info
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("generator exploded"));

    let session = h.sessions.get(&session.id).await.unwrap();
    assert!(session.active_opinion_request_id.is_none());

    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let h = harness(Arc::new(MockGenerator::new(Duration::ZERO)));
    let result = h
        .coordinator
        .start_response_generation("missing", GenerationOptions::default())
        .await;
    assert!(result.is_err());
    assert_eq!(h.coordinator.statistics().await.total_requests, 0);
}

#[tokio::test]
async fn test_statistics_and_pruning() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::ZERO)));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    h.coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    h.sink.wait_for(1).await;
    wait_until_idle(&h.coordinator, &session.id).await;

    let stats = h.coordinator.statistics().await;
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.completed_requests, 1);
    assert_eq!(stats.active_response_requests, 0);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

    // Long retention keeps the record, zero retention drops it
    assert_eq!(h.coordinator.prune_finished(chrono::Duration::hours(1)).await, 0);
    assert_eq!(h.coordinator.prune_finished(chrono::Duration::zero()).await, 1);
    assert!(h.coordinator.session_requests(&session.id).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_shutdown_cancels_everything() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::from_secs(5))));
    let a = h.sessions.create(SessionConfig::default(), Vec::new()).await?;
    let b = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    h.coordinator
        .start_response_generation(&a.id, GenerationOptions::default())
        .await?;
    h.coordinator
        .start_opinion_prediction(&b.id, "ok".to_string())
        .await?;
    assert_eq!(h.coordinator.active_requests().await.len(), 2);

    h.coordinator.shutdown().await;

    assert!(h.coordinator.active_requests().await.is_empty());
    assert_eq!(h.coordinator.statistics().await.cancelled_requests, 2);

    Ok(())
}

#[tokio::test]
async fn test_opinion_supersede_keeps_response_running() -> Result<()> {
    let h = harness(Arc::new(MockGenerator::new(Duration::from_millis(200))));
    let session = h.sessions.create(SessionConfig::default(), Vec::new()).await?;

    let response = h
        .coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    let first = h
        .coordinator
        .start_opinion_prediction(&session.id, "Sure".to_string())
        .await?;
    let second = h
        .coordinator
        .start_opinion_prediction(&session.id, "Actually no".to_string())
        .await?;

    assert_eq!(
        h.coordinator.request_info(&first).await.unwrap().status,
        RequestStatus::Cancelled
    );
    assert!(h.coordinator.request_info(&response).await.unwrap().is_active());

    h.sink.wait_for(2).await;
    wait_until_idle(&h.coordinator, &session.id).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    // One prediction, from the newer request, next to the untouched response
    let events = h.sink.events();
    let predictions: Vec<&String> = events
        .iter()
        .filter_map(|(_, e)| match e {
            OutboundEvent::OpinionPredictionResponse { request_id, .. } => Some(request_id),
            _ => None,
        })
        .collect();
    assert_eq!(predictions, vec![&second]);
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        OutboundEvent::LlmResponse { request_id, .. } if request_id == &response
    )));

    Ok(())
}

#[tokio::test]
async fn test_newer_request_waits_for_pending_delivery() -> Result<()> {
    let sessions = Arc::new(SessionStore::new());
    let sink = Arc::new(GatedSink::new());
    let coordinator = RequestCoordinator::new(
        sessions.clone(),
        Arc::new(MockGenerator::new(Duration::ZERO)),
        sink.clone(),
    );
    let session = sessions.create(SessionConfig::default(), Vec::new()).await?;

    let first = coordinator
        .start_response_generation(&session.id, GenerationOptions::default())
        .await?;
    tokio::time::timeout(Duration::from_secs(2), sink.entered.notified()).await?;

    // The first result is mid-delivery, so a newer request cannot start yet
    let newer = {
        let coordinator = coordinator.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move {
            coordinator
                .start_response_generation(&session_id, GenerationOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!newer.is_finished());

    sink.gate.add_permits(1);
    let second = tokio::time::timeout(Duration::from_secs(2), newer).await???;
    assert_eq!(
        coordinator.request_info(&first).await.unwrap().status,
        RequestStatus::Completed
    );

    sink.gate.add_permits(1);
    for _ in 0..400 {
        if sink.request_ids().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sink.request_ids(), vec![first, second]);

    Ok(())
}
