//! Graceful shutdown of the broadcast service.
//!
//! Order of operations:
//! 1. Background tasks are told to stop
//! 2. Running and scheduled broadcasts are cancelled (results so far stay recorded)
//! 3. Cancelled broadcasts get a bounded amount of time to write their final status

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::broadcast::BroadcastService;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for cancelled broadcasts to finish (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a shutdown sequence
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub broadcasts_cancelled: usize,
    /// Every broadcast finished before the drain timeout
    pub drained: bool,
    pub duration: Duration,
}

/// Handles graceful shutdown of the service
pub struct GracefulShutdown {
    service: Arc<BroadcastService>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(service: Arc<BroadcastService>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(service, shutdown_tx, ShutdownConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        service: Arc<BroadcastService>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            service,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(active_broadcasts = self.service.active_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Cancelling active broadcasts");
        result.broadcasts_cancelled = self.service.active_count();
        self.service.shutdown();

        tracing::info!("Phase 3: Waiting for broadcasts to record their final status");
        result.drained = self.service.drain(self.config.drain_timeout).await;

        result.duration = start.elapsed();
        tracing::info!(
            broadcasts_cancelled = result.broadcasts_cancelled,
            drained = result.drained,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}
