use crate::protocol::OutboundEvent;

/// Destination for events produced outside the connection that asked for them
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    /// Deliver an event to every client subscribed to the session
    ///
    /// Returns the number of clients reached. Must not wait on slow clients:
    /// the coordinator delivers while holding its request state.
    async fn deliver(&self, session_id: &str, event: OutboundEvent) -> usize;
}
