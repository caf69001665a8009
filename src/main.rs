use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use pagecast_service::config::Settings;
use pagecast_service::server::{create_app, AppState};
use pagecast_service::shutdown::{GracefulShutdown, ShutdownConfig};
use pagecast_service::store::create_broadcast_store;
use pagecast_service::tasks::LimiterCleanupTask;
use pagecast_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; telemetry settings live in it
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let store = create_broadcast_store(&settings.database).await?;
    tracing::info!(backend = %settings.database.backend, "Broadcast store ready");

    let state = AppState::new(settings.clone(), store)?;
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let cleanup_handle = if state.limiter.config().enabled {
        let task = LimiterCleanupTask::new(state.limiter.clone(), shutdown_tx.subscribe());
        Some(tokio::spawn(task.run()))
    } else {
        None
    };

    let shutdown = GracefulShutdown::with_config(
        state.service.clone(),
        shutdown_tx,
        ShutdownConfig {
            drain_timeout: Duration::from_secs(settings.broadcast.shutdown_drain_seconds),
        },
    );

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Cancel broadcasts before the server waits on in-flight send requests
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = wait_for_signal().await;
            shutdown.execute(reason).await;
        })
        .await?;

    if let Some(handle) = cleanup_handle {
        tracing::info!("Waiting for background tasks to finish...");
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "ctrl_c"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "sigterm"
        }
    }
}
