use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ratelimit::BroadcastLimiter;

/// Background task that forgets admission buckets of inactive pages
pub struct LimiterCleanupTask {
    limiter: Arc<BroadcastLimiter>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LimiterCleanupTask {
    pub fn new(limiter: Arc<BroadcastLimiter>, shutdown: broadcast::Receiver<()>) -> Self {
        let interval = Duration::from_secs(limiter.config().cleanup_interval_seconds.max(1));
        Self {
            limiter,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            cleanup_interval_secs = self.interval.as_secs(),
            "Limiter cleanup task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Limiter cleanup task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.limiter.cleanup_idle();
                }
            }
        }

        tracing::info!("Limiter cleanup task stopped");
    }
}
