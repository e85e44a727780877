//! Domain and wire types for the flowgate control plane.
//!
//! These types cover the JSON contract between application-node agents
//! and the central coordinator, plus the in-process snapshots both
//! sides expose for observability. Timestamps on the wire are RFC3339.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable integer identifying a traffic profile.
pub type ProfileId = u32;

/// Unique identifier for an application node.
pub type NodeId = String;

// ── Node state ─────────────────────────────────────────────────────

/// Liveness state of an application node, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unknown,
    Online,
    Offline,
    Overloaded,
}

impl NodeState {
    /// Whether the node participates in lease redistribution.
    pub fn is_online(self) -> bool {
        matches!(self, NodeState::Online)
    }
}

// ── Profiles ───────────────────────────────────────────────────────

/// Rate-control algorithm applied to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateControlMethod {
    #[default]
    None,
    TokenBucket,
    FixedWindow,
}

/// Immutable configuration of a traffic profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    /// Budget units per refresh window.
    pub total_quota: i64,
    /// Units per second admitted by the rate gate.
    pub rate_limit: i64,
    /// Maximum instantaneous tokens.
    pub burst: i64,
    pub description: String,
    /// Accounting window for the rate gate.
    pub window: Duration,
    pub rate_control_method: RateControlMethod,
}

// ── Quota wire contract ────────────────────────────────────────────

/// One profile's slice of a quota request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileQuota {
    pub profile_id: ProfileId,
    /// Units requested. Zero means lease refresh only.
    pub required: i64,
}

/// Lease request/refresh sent from an agent to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub node_id: NodeId,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub quotas: Vec<ProfileQuota>,
}

/// One profile's slice of a quota response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileGrant {
    pub profile_id: ProfileId,
    pub granted: i64,
    pub required: i64,
    pub rate_limited: bool,
}

/// Coordinator response to a quota request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub request_id: String,
    /// Deadline after which the granted leases are stale.
    pub expires_at: DateTime<Utc>,
    pub quotas: Vec<ProfileGrant>,
}

// ── Node status reports ────────────────────────────────────────────

/// Point-in-time copy of an agent's admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CounterSnapshot {
    pub total: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Periodic status report from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub counter: CounterSnapshot,
    pub last_seen: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Sum of unspent lease units across all local profiles.
    pub quota_left: i64,
}

/// Live admission counters, updated by atomic store so status reports
/// can read them without taking the agent's quota lock.
#[derive(Debug, Default)]
pub struct AdmissionCounter {
    total: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl AdmissionCounter {
    pub fn record_accepted(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

// ── Work admission ─────────────────────────────────────────────────

/// Incoming work request to an application node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub request_id: String,
    /// Units required per profile for this request.
    pub quotas: BTreeMap<ProfileId, i64>,
}

/// Outcome of a local admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Admitted,
    RateLimited,
    QuotaExceeded,
    ProfileUnknown,
}

/// Response returned to the caller of an admission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResponse {
    pub request_id: String,
    pub status: AdmissionStatus,
}

// ── Status snapshots ───────────────────────────────────────────────

/// One profile's lease state as held by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub allocated: i64,
    pub used: i64,
    pub available: i64,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Full local-quota snapshot of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeQuotaStatus {
    pub node_id: NodeId,
    pub quotas: BTreeMap<ProfileId, ProfileStatus>,
}

/// One profile's budget as held by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileBudgetSnapshot {
    pub total_quota: i64,
    pub used: i64,
    pub available: i64,
    /// Outstanding lease per node.
    pub nodes: BTreeMap<NodeId, i64>,
}

/// One node record as held by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecordSnapshot {
    pub state: NodeState,
    pub last_seen: DateTime<Utc>,
    /// Average of the recent acceptance-ratio window, if any reports
    /// have been observed.
    pub acceptance_ratio: Option<f64>,
}

/// Read-only view of the coordinator's budgets and node registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuotaStatusSnapshot {
    pub profiles: BTreeMap<ProfileId, ProfileBudgetSnapshot>,
    pub nodes: BTreeMap<NodeId, NodeRecordSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_request_round_trips() {
        let req = QuotaRequest {
            node_id: "node-1".to_string(),
            request_id: "req-42".to_string(),
            timestamp: Utc::now(),
            quotas: vec![
                ProfileQuota { profile_id: 1, required: 100 },
                ProfileQuota { profile_id: 2, required: 0 },
            ],
        };

        let json = serde_json::to_string(&req).unwrap();
        let back: QuotaRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn node_state_wire_names() {
        assert_eq!(serde_json::to_string(&NodeState::Online).unwrap(), r#""online""#);
        assert_eq!(serde_json::to_string(&NodeState::Overloaded).unwrap(), r#""overloaded""#);
        let state: NodeState = serde_json::from_str(r#""offline""#).unwrap();
        assert_eq!(state, NodeState::Offline);
    }

    #[test]
    fn quota_response_carries_rate_limited_flag() {
        let json = r#"{
            "request_id": "req-1",
            "expires_at": "2026-01-01T00:00:05Z",
            "quotas": [
                { "profile_id": 1, "granted": 0, "required": 10, "rate_limited": true }
            ]
        }"#;
        let resp: QuotaResponse = serde_json::from_str(json).unwrap();
        assert!(resp.quotas[0].rate_limited);
        assert_eq!(resp.quotas[0].granted, 0);
    }

    #[test]
    fn counter_snapshot_is_consistent() {
        let counter = AdmissionCounter::default();
        counter.record_accepted();
        counter.record_accepted();
        counter.record_rejected();

        let snap = counter.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.rejected, 1);
    }

    #[test]
    fn work_request_map_keys_serialize_as_strings() {
        let mut quotas = BTreeMap::new();
        quotas.insert(1u32, 50i64);
        let req = WorkRequest {
            request_id: "r".to_string(),
            quotas,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""1":50"#));
        let back: WorkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
