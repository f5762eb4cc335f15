use super::state::AppState;
use crate::gateway::{Connection, Gateway};
use crate::request::RequestStats;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub sessions: usize,
    pub connections: usize,
    pub requests: RequestStats,
}

/// GET /health
/// Liveness plus a few gauges
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    let body = HealthResponse {
        status: "healthy".to_string(),
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: gateway.sessions().len().await,
        connections: gateway.registry().len().await,
        requests: gateway.coordinator().statistics().await,
    };
    (StatusCode::OK, Json(body))
}

/// GET /conversation
/// Upgrade to the conversation event channel
pub async fn conversation_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let Connection {
        client_id,
        mut events,
        shutdown,
    } = gateway.open_connection().await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Forward outbound events to the socket
    let send_client = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {}: {}", event.event_type(), e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                debug!("WebSocket send failed, client {} gone", send_client);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Connection {} closed by server", client_id);
                break;
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => gateway.handle_frame(&client_id, &text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed the socket", client_id);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", client_id, e);
                        break;
                    }
                }
            }
        }
    }

    gateway.close_connection(&client_id).await;
    send_task.abort();
}
