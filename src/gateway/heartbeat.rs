use super::dispatch::Gateway;
use crate::protocol::OutboundEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one supervision pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections force-closed for inactivity
    pub closed: Vec<String>,
    /// Connections sent a heartbeat ping
    pub pinged: Vec<String>,
}

impl Gateway {
    /// Check every connection's inactivity as of `now`
    ///
    /// Past the timeout a connection is closed with full disconnect handling;
    /// past half of it a heartbeat is sent.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let timeout = self.config.connection_timeout();
        let ping_after = self.config.heartbeat_after();
        let mut report = SweepReport::default();

        for (client_id, last_activity) in self.registry.activity().await {
            let idle = now.saturating_duration_since(last_activity);

            if idle > timeout {
                warn!(
                    "Connection {} idle for {}s, closing",
                    client_id,
                    idle.as_secs()
                );
                self.registry.mark_unhealthy(&client_id).await;
                if self.close_connection(&client_id).await {
                    report.closed.push(client_id);
                }
            } else if idle > ping_after {
                debug!("Pinging idle connection {}", client_id);
                self.reply(
                    &client_id,
                    OutboundEvent::Heartbeat {
                        timestamp: Utc::now(),
                    },
                )
                .await;
                report.pinged.push(client_id);
            }
        }
        report
    }

    /// Run [`Gateway::sweep`] on the configured interval until `shutdown` fires
    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let every = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Heartbeat supervisor started (every {}s)", every.as_secs());

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = gateway.sweep(Instant::now()).await;
                        if !report.closed.is_empty() {
                            info!("Heartbeat closed {} idle connections", report.closed.len());
                        }
                    }
                }
            }
            debug!("Heartbeat supervisor stopped");
        })
    }
}
