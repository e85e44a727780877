//! Periodic coordinator tasks.
//!
//! Both loops are cooperative: they tick on a timer and exit promptly
//! when the shutdown signal flips, so tests and the daemon can tear
//! them down deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::QuotaCoordinator;

/// Run the lease rebalance loop until shutdown.
pub async fn run_rebalance_loop(
    coordinator: Arc<QuotaCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?interval, "rebalance loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                coordinator.rebalance();
            }
            _ = shutdown.changed() => {
                debug!("rebalance loop shutting down");
                break;
            }
        }
    }
}

/// Run the liveness sweep loop until shutdown.
pub async fn run_liveness_loop(
    coordinator: Arc<QuotaCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?interval, "liveness sweep loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                coordinator.sweep_offline();
            }
            _ = shutdown.changed() => {
                debug!("liveness sweep loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use flowgate_types::CoordinatorConfig;

    fn test_coordinator() -> Arc<QuotaCoordinator> {
        Arc::new(QuotaCoordinator::new(&CoordinatorConfig {
            port: 8080,
            max_total_quota: 1_000_000,
            max_quota_per_node: 10_000,
            refresh_interval: Duration::from_millis(10),
            offline_threshold: Duration::from_secs(15),
            monitor_interval: Duration::from_millis(10),
            profiles: HashMap::new(),
        }))
    }

    #[tokio::test]
    async fn loops_exit_on_shutdown() {
        let coordinator = test_coordinator();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let rebalance = tokio::spawn(run_rebalance_loop(
            coordinator.clone(),
            Duration::from_millis(10),
            shutdown_rx.clone(),
        ));
        let liveness = tokio::spawn(run_liveness_loop(
            coordinator,
            Duration::from_millis(10),
            shutdown_rx,
        ));

        // Let both tick at least once, then stop them.
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), rebalance)
            .await
            .expect("rebalance loop did not stop")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), liveness)
            .await
            .expect("liveness loop did not stop")
            .unwrap();
    }
}
