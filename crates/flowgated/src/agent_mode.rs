//! Agent mode — runs on application nodes.
//!
//! In this mode the daemon:
//! 1. Builds the coordinator client and the local quota map
//! 2. Primes the leases with an initial refresh
//! 3. Runs the refresh and status-report loops
//! 4. Serves the local admission API until shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use flowgate_agent::{retry_with_backoff, CoordinatorClient, NodeAgent};
use flowgate_types::AgentConfig;

/// Run the agent until Ctrl-C.
pub async fn run_agent(config: AgentConfig, node_id: String) -> anyhow::Result<()> {
    info!(%node_id, coordinator = %config.coordinator_url, "flowgate daemon starting in agent mode");

    let client = CoordinatorClient::new(
        config.coordinator_url.clone(),
        node_id.clone(),
        config.request_timeout,
    )?;

    // Probe the coordinator with backoff before priming leases; a
    // still-unreachable coordinator is not fatal, the refresh loop
    // keeps trying.
    if let Err(e) = retry_with_backoff(|| client.health(), config.max_retries).await {
        warn!(%node_id, error = %e, "coordinator health probe failed");
    }

    let agent = Arc::new(NodeAgent::new(&config, client));
    info!(profiles = config.profiles.len(), "node agent initialized");

    // Prime the leases before serving; the refresh loop takes over on
    // failure.
    if let Err(e) = agent.refresh_quotas().await {
        warn!(%node_id, error = %e, "initial lease refresh failed");
    }

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background loops ───────────────────────────────────────
    let refresh_agent = agent.clone();
    let refresh_shutdown = shutdown_rx.clone();
    let refresh_handle = tokio::spawn(async move {
        refresh_agent.run_refresh(refresh_shutdown).await;
    });

    let report_agent = agent.clone();
    let report_shutdown = shutdown_rx.clone();
    let report_interval = config.report_interval;
    let report_handle = tokio::spawn(async move {
        report_agent.run_report(report_interval, report_shutdown).await;
    });

    // ── Admission API server ───────────────────────────────────
    let router = flowgate_api::agent_router(agent);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "admission API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = refresh_handle.await;
    let _ = report_handle.await;

    info!(%node_id, "agent stopped");
    Ok(())
}
