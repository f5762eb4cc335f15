use crate::gateway::Gateway;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Connection gateway (owns sessions, requests and live connections)
    pub gateway: Arc<Gateway>,
    /// Service name reported by the health endpoint
    pub service_name: String,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, service_name: impl Into<String>) -> Self {
        Self {
            gateway,
            service_name: service_name.into(),
        }
    }
}
