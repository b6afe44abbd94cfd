//! Periodic snapshotting of the store to disk.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::service::MetricsService;

pub struct PersistenceScheduler {
    service: Arc<MetricsService>,
    interval: Duration,
}

impl PersistenceScheduler {
    pub fn new(service: Arc<MetricsService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Saves on every interval tick until `cancel` fires. Failures are
    /// logged and the loop keeps going. The final save at shutdown is the
    /// caller's.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing to save yet.
        tick.tick().await;

        info!(interval_secs = self.interval.as_secs(), "persistence scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            match self.service.save().await {
                Ok(()) => debug!("scheduled snapshot saved"),
                Err(e) => error!(error = %e, "scheduled snapshot save failed"),
            }
        }
        info!("persistence scheduler stopped");
    }
}
