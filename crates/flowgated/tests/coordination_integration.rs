//! Coordination integration tests.
//!
//! Exercise the full agent-against-coordinator flow over a real HTTP
//! listener on an ephemeral port: lease acquisition, admission,
//! rebalance under churn, liveness, and coordinator unreachability.
//! Periodic behavior is driven by calling the rebalance/sweep
//! operations directly so the tests stay deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use flowgate_agent::{CoordinatorClient, NodeAgent};
use flowgate_api::coordinator_router;
use flowgate_coordinator::QuotaCoordinator;
use flowgate_types::{
    AdmissionStatus, AgentConfig, CoordinatorConfig, CounterSnapshot, NodeState, NodeStatus,
    ProfileConfig, ProfileQuota, QuotaStatusSnapshot, RateControlMethod, WorkRequest,
};

fn profile(total: i64, method: RateControlMethod, rate: i64, burst: i64) -> ProfileConfig {
    ProfileConfig {
        total_quota: total,
        rate_limit: rate,
        burst,
        description: String::new(),
        window: Duration::from_secs(1),
        rate_control_method: method,
    }
}

fn coordinator_config(profiles: Vec<(u32, ProfileConfig)>) -> CoordinatorConfig {
    CoordinatorConfig {
        port: 0,
        max_total_quota: 1_000_000,
        max_quota_per_node: 1_000_000,
        refresh_interval: Duration::from_secs(5),
        offline_threshold: Duration::from_secs(15),
        monitor_interval: Duration::from_secs(5),
        profiles: profiles.into_iter().collect::<HashMap<_, _>>(),
    }
}

async fn spawn_coordinator(
    config: CoordinatorConfig,
) -> (String, Arc<QuotaCoordinator>, tokio::task::JoinHandle<()>) {
    let coordinator = Arc::new(QuotaCoordinator::new(&config));
    let router = coordinator_router(coordinator.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), coordinator, handle)
}

fn agent_config(base_url: &str, profiles: Vec<(u32, ProfileConfig)>) -> AgentConfig {
    AgentConfig {
        port: 0,
        coordinator_url: base_url.to_string(),
        report_interval: Duration::from_secs(3),
        refresh_interval: Duration::from_secs(5),
        quota_margin: 0.2,
        request_timeout: Duration::from_millis(500),
        batch_size: 100,
        max_retries: 1,
        profiles: profiles.into_iter().collect::<HashMap<_, _>>(),
    }
}

fn make_agent(base_url: &str, node_id: &str, profiles: Vec<(u32, ProfileConfig)>) -> NodeAgent {
    let config = agent_config(base_url, profiles);
    let client =
        CoordinatorClient::new(base_url, node_id, config.request_timeout).unwrap();
    NodeAgent::new(&config, client)
}

fn online_report(node_id: &str) -> NodeStatus {
    NodeStatus {
        node_id: node_id.to_string(),
        state: NodeState::Online,
        counter: CounterSnapshot {
            total: 10,
            accepted: 8,
            rejected: 2,
        },
        last_seen: Utc::now(),
        cpu_usage: 0.1,
        memory_usage: 0.1,
        quota_left: 0,
    }
}

fn work(quotas: Vec<(u32, i64)>) -> WorkRequest {
    WorkRequest {
        request_id: "work-1".to_string(),
        quotas: quotas.into_iter().collect(),
    }
}

// ── Single node, clean path ─────────────────────────────────────

#[tokio::test]
async fn single_node_lease_and_admission() {
    let profiles = vec![(1, profile(1000, RateControlMethod::TokenBucket, 100, 100))];
    let (base, _coordinator, _server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let agent = make_agent(&base, "node-1", profiles);
    agent.refresh_quotas().await.unwrap();

    let status = agent.get_status();
    assert_eq!(status.quotas[&1].allocated, 1000);
    assert_eq!(status.quotas[&1].used, 0);

    for _ in 0..10 {
        let resp = agent.handle_request(&work(vec![(1, 50)]));
        assert_eq!(resp.status, AdmissionStatus::Admitted);
    }

    let status = agent.get_status();
    assert_eq!(status.quotas[&1].used, 500);
    assert_eq!(status.quotas[&1].available, 500);

    assert!(agent.health_check().is_ok());
}

// ── Rebalance under churn ───────────────────────────────────────

#[tokio::test]
async fn rebalance_redistributes_as_nodes_join() {
    let profiles = vec![(1, profile(600, RateControlMethod::None, 0, 0))];
    let (base, coordinator, _server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let agent_a = make_agent(&base, "node-a", profiles.clone());
    let agent_b = make_agent(&base, "node-b", profiles.clone());

    // Both nodes report in over HTTP, then a tick splits the budget.
    let reporter = CoordinatorClient::new(&base, "reporter", Duration::from_millis(500)).unwrap();
    reporter.report_status(&online_report("node-a")).await.unwrap();
    reporter.report_status(&online_report("node-b")).await.unwrap();
    coordinator.rebalance();

    agent_a.refresh_quotas().await.unwrap();
    agent_b.refresh_quotas().await.unwrap();
    assert_eq!(agent_a.get_status().quotas[&1].allocated, 300);
    assert_eq!(agent_b.get_status().quotas[&1].allocated, 300);

    // A third node joins; the next tick reshapes every share.
    let agent_c = make_agent(&base, "node-c", profiles);
    reporter.report_status(&online_report("node-c")).await.unwrap();
    coordinator.rebalance();

    agent_a.refresh_quotas().await.unwrap();
    agent_b.refresh_quotas().await.unwrap();
    agent_c.refresh_quotas().await.unwrap();
    assert_eq!(agent_a.get_status().quotas[&1].allocated, 200);
    assert_eq!(agent_b.get_status().quotas[&1].allocated, 200);
    assert_eq!(agent_c.get_status().quotas[&1].allocated, 200);
}

// ── Coordinator unreachable ─────────────────────────────────────

#[tokio::test]
async fn lost_coordinator_keeps_last_known_lease() {
    let profiles = vec![(1, profile(1000, RateControlMethod::None, 0, 0))];
    let (base, _coordinator, server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let agent = make_agent(&base, "node-1", profiles);
    agent.refresh_quotas().await.unwrap();
    assert_eq!(agent.get_status().quotas[&1].allocated, 1000);
    let refreshed_at = agent.get_status().quotas[&1].last_refresh.unwrap();

    // Kill the coordinator; the next refresh must fail without
    // touching local state.
    server.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(agent.refresh_quotas().await.is_err());

    let status = agent.get_status();
    assert_eq!(status.quotas[&1].allocated, 1000);
    assert_eq!(status.quotas[&1].last_refresh, Some(refreshed_at));

    // The lease pipeline is stale once 2 × refresh_interval elapses.
    assert!(agent
        .health_check_at(refreshed_at + TimeDelta::seconds(11))
        .is_err());

    // Admission still works on the last-known lease.
    let resp = agent.handle_request(&work(vec![(1, 100)]));
    assert_eq!(resp.status, AdmissionStatus::Admitted);
}

// ── Node goes offline then returns ──────────────────────────────

#[tokio::test]
async fn silent_node_is_swept_then_restored_on_report() {
    let profiles = vec![(1, profile(600, RateControlMethod::None, 0, 0))];
    let (base, coordinator, _server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let reporter = CoordinatorClient::new(&base, "reporter", Duration::from_millis(500)).unwrap();
    reporter.report_status(&online_report("node-a")).await.unwrap();
    coordinator.rebalance();

    let snap: QuotaStatusSnapshot = coordinator.status_snapshot();
    assert_eq!(snap.profiles[&1].nodes["node-a"], 600);

    // Silent past the threshold: swept offline and zeroed.
    coordinator.sweep_offline_at(Utc::now() + TimeDelta::seconds(16));
    let snap = coordinator.status_snapshot();
    assert_eq!(snap.nodes["node-a"].state, NodeState::Offline);
    assert_eq!(snap.profiles[&1].nodes["node-a"], 0);

    // Next report flips it back online; the next tick restores the
    // share.
    reporter.report_status(&online_report("node-a")).await.unwrap();
    coordinator.rebalance();
    let snap = coordinator.status_snapshot();
    assert_eq!(snap.nodes["node-a"].state, NodeState::Online);
    assert_eq!(snap.profiles[&1].nodes["node-a"], 600);
}

// ── Unknown profile ─────────────────────────────────────────────

#[tokio::test]
async fn unknown_profile_grants_nothing() {
    let profiles = vec![(1, profile(1000, RateControlMethod::None, 0, 0))];
    let (base, coordinator, _server) = spawn_coordinator(coordinator_config(profiles)).await;

    let client = CoordinatorClient::new(&base, "node-1", Duration::from_millis(500)).unwrap();
    let resp = client
        .request_quota(vec![ProfileQuota {
            profile_id: 999,
            required: 50,
        }])
        .await
        .unwrap();

    assert_eq!(resp.quotas.len(), 1);
    assert_eq!(resp.quotas[0].profile_id, 999);
    assert_eq!(resp.quotas[0].granted, 0);
    assert_eq!(resp.quotas[0].required, 50);
    assert!(!resp.quotas[0].rate_limited);

    // No budget state was touched.
    let snap = coordinator.status_snapshot();
    assert_eq!(snap.profiles[&1].used, 0);
}

// ── Status reporting over HTTP ──────────────────────────────────

#[tokio::test]
async fn status_report_brings_node_online() {
    let profiles = vec![(1, profile(1000, RateControlMethod::None, 0, 0))];
    let (base, coordinator, _server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let agent = make_agent(&base, "node-1", profiles);
    let reporter = CoordinatorClient::new(&base, "node-1", Duration::from_millis(500)).unwrap();
    reporter.report_status(&agent.node_status(0.2, 0.3)).await.unwrap();

    let snap = coordinator.status_snapshot();
    assert_eq!(snap.nodes["node-1"].state, NodeState::Online);
    assert!(snap.nodes["node-1"].acceptance_ratio.is_some());
}

// ── Observability endpoint ──────────────────────────────────────

#[tokio::test]
async fn quota_status_endpoint_exposes_snapshot() {
    let profiles = vec![(1, profile(1000, RateControlMethod::None, 0, 0))];
    let (base, _coordinator, _server) = spawn_coordinator(coordinator_config(profiles.clone())).await;

    let agent = make_agent(&base, "node-1", profiles);
    agent.refresh_quotas().await.unwrap();

    let snap: QuotaStatusSnapshot = reqwest::get(format!("{base}/api/v1/quota/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(snap.profiles[&1].total_quota, 1000);
    assert_eq!(snap.profiles[&1].nodes["node-1"], 1000);
}

// ── Coordinator health probe ────────────────────────────────────

#[tokio::test]
async fn coordinator_health_probe_succeeds() {
    let (base, _coordinator, _server) =
        spawn_coordinator(coordinator_config(Vec::new())).await;

    let client = CoordinatorClient::new(&base, "node-1", Duration::from_millis(500)).unwrap();
    client.health().await.unwrap();
}
