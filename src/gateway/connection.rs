use crate::protocol::OutboundEvent;
use crate::request::OutboundSink;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bookkeeping for one physical connection
#[derive(Debug)]
pub struct ConnectionRecord {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub message_count: u64,
    pub error_count: u64,
    /// Every session touched over this connection
    pub session_ids: BTreeSet<String>,
    pub healthy: bool,
    sender: mpsc::Sender<OutboundEvent>,
    shutdown: CancellationToken,
}

impl ConnectionRecord {
    /// Signal the transport loop to stop
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Read-only view of a connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub idle_secs: f64,
    pub message_count: u64,
    pub error_count: u64,
    pub session_ids: Vec<String>,
    pub healthy: bool,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, ConnectionRecord>,
    /// session id -> subscribed client ids
    subscribers: HashMap<String, BTreeSet<String>>,
}

/// Live connections and the sessions each one is subscribed to
///
/// Outbound events for a session are routed only to its subscribers.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        client_id: &str,
        sender: mpsc::Sender<OutboundEvent>,
        shutdown: CancellationToken,
    ) {
        let record = ConnectionRecord {
            client_id: client_id.to_string(),
            connected_at: Utc::now(),
            last_activity: Instant::now(),
            message_count: 0,
            error_count: 0,
            session_ids: BTreeSet::new(),
            healthy: true,
            sender,
            shutdown,
        };
        self.inner
            .write()
            .await
            .connections
            .insert(client_id.to_string(), record);
    }

    /// Remove a connection and its subscriptions
    ///
    /// Only the first caller gets the record back, so disconnect handling
    /// runs once per connection.
    pub async fn remove(&self, client_id: &str) -> Option<ConnectionRecord> {
        let mut inner = self.inner.write().await;
        let record = inner.connections.remove(client_id)?;

        for session_id in &record.session_ids {
            if let Some(clients) = inner.subscribers.get_mut(session_id) {
                clients.remove(client_id);
                if clients.is_empty() {
                    inner.subscribers.remove(session_id);
                }
            }
        }
        Some(record)
    }

    /// Record inbound traffic on a connection
    pub async fn touch(&self, client_id: &str, now: Instant) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(client_id) {
            Some(record) => {
                record.last_activity = now;
                record.message_count += 1;
                record.healthy = true;
                true
            }
            None => false,
        }
    }

    pub async fn record_error(&self, client_id: &str) {
        if let Some(record) = self.inner.write().await.connections.get_mut(client_id) {
            record.error_count += 1;
        }
    }

    pub async fn mark_unhealthy(&self, client_id: &str) {
        if let Some(record) = self.inner.write().await.connections.get_mut(client_id) {
            record.healthy = false;
        }
    }

    /// Subscribe a connection to a session's events
    pub async fn link(&self, client_id: &str, session_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.connections.get_mut(client_id) else {
            return;
        };
        if record.session_ids.insert(session_id.to_string()) {
            debug!("Client {} linked to session {}", client_id, session_id);
        }
        inner
            .subscribers
            .entry(session_id.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    /// Drop every subscription to a destroyed session
    pub async fn unlink_session(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(clients) = inner.subscribers.remove(session_id) else {
            return;
        };
        for client_id in clients {
            if let Some(record) = inner.connections.get_mut(&client_id) {
                record.session_ids.remove(session_id);
            }
        }
    }

    pub async fn subscribers(&self, session_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .subscribers
            .get(session_id)
            .map(|clients| clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn has_subscribers(&self, session_id: &str) -> bool {
        self.inner.read().await.subscribers.contains_key(session_id)
    }

    /// Last activity of every connection
    pub async fn activity(&self) -> Vec<(String, Instant)> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .map(|r| (r.client_id.clone(), r.last_activity))
            .collect()
    }

    pub async fn client_ids(&self) -> Vec<String> {
        self.inner.read().await.connections.keys().cloned().collect()
    }

    pub async fn info(&self, client_id: &str) -> Option<ConnectionInfo> {
        let inner = self.inner.read().await;
        let record = inner.connections.get(client_id)?;
        Some(ConnectionInfo {
            client_id: record.client_id.clone(),
            connected_at: record.connected_at,
            idle_secs: record.last_activity.elapsed().as_secs_f64(),
            message_count: record.message_count,
            error_count: record.error_count,
            session_ids: record.session_ids.iter().cloned().collect(),
            healthy: record.healthy,
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.connections.is_empty()
    }

    /// Send an event to one connection
    pub async fn send_to(&self, client_id: &str, event: OutboundEvent) -> bool {
        let outlet = {
            let inner = self.inner.read().await;
            match inner.connections.get(client_id) {
                Some(record) => Outlet::of(record),
                None => return false,
            }
        };
        self.offer(client_id, outlet, event).await
    }

    /// Queue an event without waiting on the client
    ///
    /// A full buffer means the client stopped reading: the event is dropped,
    /// the connection is marked unhealthy and its transport is told to close.
    async fn offer(&self, client_id: &str, outlet: Outlet, event: OutboundEvent) -> bool {
        let event_type = event.event_type();
        match outlet.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound buffer full for {}, dropped {} and closing",
                    client_id, event_type
                );
                self.mark_unhealthy(client_id).await;
                outlet.shutdown.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Dropped {} for closed connection {}", event_type, client_id);
                false
            }
        }
    }
}

/// Outbound side of a connection, cloned out of the registry lock
struct Outlet {
    sender: mpsc::Sender<OutboundEvent>,
    shutdown: CancellationToken,
}

impl Outlet {
    fn of(record: &ConnectionRecord) -> Self {
        Self {
            sender: record.sender.clone(),
            shutdown: record.shutdown.clone(),
        }
    }
}

#[async_trait::async_trait]
impl OutboundSink for ConnectionRegistry {
    async fn deliver(&self, session_id: &str, event: OutboundEvent) -> usize {
        let outlets: Vec<(String, Outlet)> = {
            let inner = self.inner.read().await;
            inner
                .subscribers
                .get(session_id)
                .into_iter()
                .flatten()
                .filter_map(|client_id| {
                    inner
                        .connections
                        .get(client_id)
                        .map(|r| (client_id.clone(), Outlet::of(r)))
                })
                .collect()
        };

        if outlets.is_empty() {
            debug!(
                "No subscribers for session {}, {} dropped",
                session_id,
                event.event_type()
            );
            return 0;
        }

        let mut reached = 0;
        for (client_id, outlet) in outlets {
            if self.offer(&client_id, outlet, event.clone()).await {
                reached += 1;
            }
        }
        reached
    }
}
