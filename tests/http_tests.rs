// Integration tests for the HTTP surface

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use convo_assist::session::{SessionConfig, SessionStore};
use convo_assist::{
    create_router, AppState, Gateway, GatewayConfig, MockGenerator, MockTranscriber,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app_state() -> AppState {
    let gateway = Gateway::new(
        GatewayConfig::default(),
        Arc::new(SessionStore::new()),
        Arc::new(MockTranscriber::new(Duration::ZERO)),
        Arc::new(MockGenerator::new(Duration::ZERO)),
        1024,
    );
    AppState::new(Arc::new(gateway), "convo-assist-test")
}

#[tokio::test]
async fn test_health_reports_gauges() -> Result<()> {
    let state = app_state();
    state
        .gateway
        .sessions()
        .create(SessionConfig::default(), Vec::new())
        .await?;
    let _conn = state.gateway.open_connection().await;

    let response = create_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await?.to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "convo-assist-test");
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["connections"], 1);
    assert_eq!(body["requests"]["total_requests"], 0);

    Ok(())
}

#[tokio::test]
async fn test_conversation_requires_upgrade() -> Result<()> {
    let response = create_router(app_state())
        .oneshot(Request::builder().uri("/conversation").body(Body::empty())?)
        .await?;

    // A plain GET without upgrade headers is rejected by the extractor
    assert!(response.status().is_client_error());

    Ok(())
}

#[tokio::test]
async fn test_unknown_route() -> Result<()> {
    let response = create_router(app_state())
        .oneshot(Request::builder().uri("/nope").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
