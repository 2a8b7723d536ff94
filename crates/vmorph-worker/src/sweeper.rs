//! Background eviction of finished jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::JobRegistry;

/// Gauge of jobs currently held by the registry.
pub const JOBS_TRACKED: &str = "vmorph_jobs_tracked";

/// Periodically drops finished jobs past their retention window.
pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    every: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<JobRegistry>, every: Duration) -> Self {
        Self { registry, every }
    }

    /// Run until `shutdown` fires. Should be spawned as a background task.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting job retention sweeper (interval: {:?})", self.every);

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep_once().await;
                    if evicted > 0 {
                        debug!("Evicted {} finished jobs", evicted);
                    }
                }
            }
        }

        debug!("Job retention sweeper stopped");
    }

    /// Run a single eviction pass, returning the number of evicted jobs.
    pub async fn sweep_once(&self) -> usize {
        let evicted = self.registry.evict_expired(Utc::now()).await;
        gauge!(JOBS_TRACKED).set(self.registry.len().await as f64);
        evicted
    }
}
