// Integration tests for the session store
//
// These tests drive sessions through the store's mutation surface and
// check the recording state machine and its invariants.

use anyhow::Result;
use convo_assist::session::{
    HistoryMessage, SessionConfig, SessionError, SessionStatus, SessionStore,
};

#[tokio::test]
async fn test_create_validates_response_count() -> Result<()> {
    let store = SessionStore::new();

    let err = store
        .create(SessionConfig::new(None, 0), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::InvalidResponseCount(0));
    assert!(store.is_empty().await);

    let session = store
        .create(SessionConfig::new(Some("job interview".to_string()), 5), Vec::new())
        .await?;
    assert_eq!(session.status, SessionStatus::Idle);
    assert_eq!(store.len().await, 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() -> Result<()> {
    let store = SessionStore::new();
    store
        .create_with_id("s1".to_string(), SessionConfig::default(), Vec::new())
        .await?;

    let err = store
        .create_with_id("s1".to_string(), SessionConfig::default(), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::AlreadyExists("s1".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_recording_round_trip_through_store() -> Result<()> {
    let store = SessionStore::new();
    let session = store.create(SessionConfig::default(), Vec::new()).await?;
    let id = session.id.clone();

    let temp_id = store.try_update(&id, |s| s.start_message("friend")).await?;
    assert!(temp_id.starts_with("temp_0_"));

    let message = store
        .try_update(&id, |s| s.end_message("hello there".to_string()))
        .await?;
    assert_eq!(message.id, "msg_001");

    let session = store.get(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Idle);
    assert!(session.current_message_id.is_none());
    assert!(session.current_message_sender.is_none());
    assert_eq!(session.messages.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_end_message_rejected_when_not_recording() -> Result<()> {
    let store = SessionStore::new();
    let session = store.create(SessionConfig::default(), Vec::new()).await?;

    let err = store
        .try_update(&session.id, |s| s.end_message("ghost".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NoMessageInProgress(session.id.clone()));
    assert!(store.get(&session.id).await.unwrap().messages.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_update_unknown_session() {
    let store = SessionStore::new();
    let err = store.update("missing", |s| s.status).await.unwrap_err();
    assert_eq!(err, SessionError::NotFound("missing".to_string()));
}

#[tokio::test]
async fn test_restore_does_not_replace_resident_session() -> Result<()> {
    let store = SessionStore::new();
    let session = store.create(SessionConfig::default(), Vec::new()).await?;
    store
        .update(&session.id, |s| s.add_modification("be brief".to_string()))
        .await?;

    assert!(!store.restore(session.clone()).await);
    assert_eq!(store.get(&session.id).await.unwrap().modifications.len(), 1);

    store.destroy(&session.id).await;
    assert!(store.restore(session.clone()).await);
    assert!(store.get(&session.id).await.unwrap().modifications.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_summary_reflects_state() -> Result<()> {
    let store = SessionStore::new();
    let history = vec![HistoryMessage {
        message_id: "h1".to_string(),
        sender: "friend".to_string(),
        content: "long time no see".to_string(),
    }];
    let session = store
        .create(SessionConfig::new(Some("reunion".to_string()), 2), history)
        .await?;

    store
        .update(&session.id, |s| {
            s.add_modification("warmer".to_string());
            s.set_user_opinion("happy to meet".to_string());
        })
        .await?;

    let summary = store.summary(&session.id).await.unwrap();
    assert_eq!(summary.history_count, 1);
    assert_eq!(summary.modification_count, 1);
    assert!(summary.has_scenario);
    assert!(summary.has_user_opinion);
    assert_eq!(summary.response_count, 2);
    assert_eq!(store.summaries().await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cleanup_expired_removes_idle_sessions() -> Result<()> {
    let store = SessionStore::new();
    let stale = store.create(SessionConfig::default(), Vec::new()).await?;
    let fresh = store.create(SessionConfig::default(), Vec::new()).await?;

    store
        .update(&stale.id, |s| {
            s.updated_at = chrono::Utc::now() - chrono::Duration::hours(3);
        })
        .await?;

    let removed = store.cleanup_expired(chrono::Duration::hours(1)).await;
    assert_eq!(removed, vec![stale.id.clone()]);
    assert!(!store.contains(&stale.id).await);
    assert!(store.contains(&fresh.id).await);

    Ok(())
}
