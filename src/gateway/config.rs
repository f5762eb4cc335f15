use serde::Deserialize;
use std::time::Duration;

/// Connection supervision settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How often the heartbeat supervisor wakes
    pub heartbeat_interval_secs: u64,
    /// Inactivity after which a connection is force-closed; half of it triggers a heartbeat
    pub connection_timeout_secs: u64,
    /// Outbound events buffered per connection; a client that lets it fill is closed
    pub outbound_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            connection_timeout_secs: 600,
            outbound_buffer: 256,
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Inactivity after which a heartbeat ping is sent
    pub fn heartbeat_after(&self) -> Duration {
        self.connection_timeout() / 2
    }
}
