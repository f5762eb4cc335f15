use super::store::PersistenceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background loop deleting expired snapshots on a fixed interval
pub struct PeriodicCleanup {
    store: Arc<PersistenceStore>,
    interval: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PeriodicCleanup {
    pub fn new(store: Arc<PersistenceStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the loop; returns false if it is already running
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            warn!("Snapshot cleanup already running");
            return false;
        }

        let token = CancellationToken::new();
        let stop = token.clone();
        let store = Arc::clone(&self.store);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.cleanup_expired().await {
                            error!("Snapshot cleanup failed: {:#}", e);
                        }
                    }
                }
            }
            debug!("Snapshot cleanup loop exited");
        });

        info!(
            "Snapshot cleanup started (every {} min)",
            self.interval.as_secs() / 60
        );
        self.running = Some((token, handle));
        true
    }

    pub async fn stop(&mut self) {
        let Some((token, handle)) = self.running.take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!("Snapshot cleanup task ended abnormally: {}", e);
        }
        info!("Snapshot cleanup stopped");
    }
}
