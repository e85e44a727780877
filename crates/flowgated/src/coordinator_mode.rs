//! Coordinator mode — owns the budgets, serves the quota API.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use flowgate_coordinator::{run_liveness_loop, run_rebalance_loop, QuotaCoordinator};
use flowgate_types::CoordinatorConfig;

/// Run the coordinator until Ctrl-C.
pub async fn run_coordinator(config: CoordinatorConfig) -> anyhow::Result<()> {
    info!("flowgate daemon starting in coordinator mode");

    let coordinator = Arc::new(QuotaCoordinator::new(&config));
    info!(
        profiles = config.profiles.len(),
        refresh_interval = ?config.refresh_interval,
        offline_threshold = ?config.offline_threshold,
        "quota coordinator initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────
    let rebalance_handle = tokio::spawn(run_rebalance_loop(
        coordinator.clone(),
        config.refresh_interval,
        shutdown_rx.clone(),
    ));
    let liveness_handle = tokio::spawn(run_liveness_loop(
        coordinator.clone(),
        config.monitor_interval,
        shutdown_rx.clone(),
    ));

    // ── API server ─────────────────────────────────────────────
    let router = flowgate_api::coordinator_router(coordinator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "quota API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = rebalance_handle.await;
    let _ = liveness_handle.await;

    info!("coordinator stopped");
    Ok(())
}
