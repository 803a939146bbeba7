use std::sync::Arc;
use tracing::{info, warn};

use aistrack_tracker_lib::IngestionSupervisor;

/// Wait for SIGTERM or ctrl-c, then stop ingestion.
///
/// Workers close their upstream connections first; closing the observers
/// afterwards ends every live feed so the HTTP server can drain.
pub async fn wait_for_shutdown(supervisor: Arc<IngestionSupervisor>) {
    shutdown_signal().await;
    info!("shutdown signal received");
    supervisor.stop().await;
    supervisor.broadcaster().close_all();
}

/// Listen for SIGTERM (container termination) or ctrl-c.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGTERM, ctrl-c only");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = ctrl_c() => info!("ctrl-c received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
