//! Quota coordinator — serialized budget accounting and lease issuance.
//!
//! Every mutating operation (lease checks, status reports, rebalance,
//! liveness sweep) takes the single write lock, so admissions are
//! linearized and a caller never observes a partially applied
//! request. Pure status queries take the read lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use flowgate_types::{
    CoordinatorConfig, NodeState, NodeStatus, ProfileBudgetSnapshot, ProfileGrant, ProfileId,
    QuotaRequest, QuotaResponse, QuotaStatusSnapshot, NodeId, NodeRecordSnapshot,
};

use crate::budget::{to_delta, NodeAllocation, ProfileBudget};
use crate::registry::NodeRecord;

/// Acceptance average below which a first lease is shrunk.
const LOW_ACCEPTANCE_RATIO: f64 = 0.5;
/// Acceptance average above which a first lease is grown.
const HIGH_ACCEPTANCE_RATIO: f64 = 0.8;

struct Inner {
    profiles: HashMap<ProfileId, ProfileBudget>,
    nodes: HashMap<NodeId, NodeRecord>,
}

/// The coordinator's quota manager.
///
/// Owns profile budgets and the node registry exclusively; agents only
/// ever hold advisory copies of the leases granted here.
pub struct QuotaCoordinator {
    inner: RwLock<Inner>,
    refresh_interval: std::time::Duration,
    offline_threshold: std::time::Duration,
    max_quota_per_node: i64,
}

impl QuotaCoordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let configured: i64 = config.profiles.values().map(|p| p.total_quota).sum();
        if configured > config.max_total_quota {
            warn!(
                configured,
                max_total_quota = config.max_total_quota,
                "profile budgets exceed max_total_quota"
            );
        }

        let now = Utc::now();
        let profiles = config
            .profiles
            .iter()
            .map(|(id, p)| (*id, ProfileBudget::new(p.clone(), now)))
            .collect();

        Self {
            inner: RwLock::new(Inner {
                profiles,
                nodes: HashMap::new(),
            }),
            refresh_interval: config.refresh_interval,
            offline_threshold: config.offline_threshold,
            max_quota_per_node: config.max_quota_per_node,
        }
    }

    /// Lease window length; responses expire one interval from grant.
    pub fn refresh_interval(&self) -> std::time::Duration {
        self.refresh_interval
    }

    /// Process a lease check/refresh request.
    pub fn check_quota(&self, req: &QuotaRequest) -> QuotaResponse {
        self.check_quota_at(req, Utc::now())
    }

    /// Clock-injected variant of [`check_quota`](Self::check_quota).
    pub fn check_quota_at(&self, req: &QuotaRequest, now: DateTime<Utc>) -> QuotaResponse {
        let mut guard = self.inner.write();
        let Inner { profiles, nodes } = &mut *guard;

        // First sight of a node creates its record; it stays `unknown`
        // until the first status report arrives.
        nodes
            .entry(req.node_id.clone())
            .or_insert_with(|| NodeRecord::new(req.node_id.clone(), now));

        let online = nodes.values().filter(|n| n.state.is_online()).count();
        let requester = nodes.get(&req.node_id);
        let requester_online = requester.map(|n| n.state.is_online()).unwrap_or(false);
        let share_divisor = if requester_online { online.max(1) } else { online + 1 } as i64;
        let acceptance = requester.and_then(|n| n.average_acceptance());

        let mut grants = Vec::with_capacity(req.quotas.len());
        for pq in &req.quotas {
            let Some(budget) = profiles.get_mut(&pq.profile_id) else {
                grants.push(ProfileGrant {
                    profile_id: pq.profile_id,
                    granted: 0,
                    required: pq.required,
                    rate_limited: false,
                });
                continue;
            };

            if budget.gate.is_limited(&budget.config, now) {
                debug!(node_id = %req.node_id, profile_id = pq.profile_id, "request rate limited");
                grants.push(ProfileGrant {
                    profile_id: pq.profile_id,
                    granted: 0,
                    required: pq.required,
                    rate_limited: true,
                });
                continue;
            }

            let granted = if pq.required == 0 {
                self.refresh_lease(budget, &req.node_id, share_divisor, acceptance, now)
            } else {
                self.grant_extra(budget, &req.node_id, pq.required, now)
            };

            grants.push(ProfileGrant {
                profile_id: pq.profile_id,
                granted,
                required: pq.required,
                rate_limited: false,
            });
        }

        QuotaResponse {
            request_id: req.request_id.clone(),
            expires_at: now + to_delta(self.refresh_interval),
            quotas: grants,
        }
    }

    /// Handle a refresh-only entry (`required = 0`).
    ///
    /// A node with a standing allocation gets it echoed back with no
    /// budget mutation. A node without one — it joined since the last
    /// rebalance tick — is sized an equal share, scaled by its
    /// acceptance history and capped by the remaining budget.
    fn refresh_lease(
        &self,
        budget: &mut ProfileBudget,
        node_id: &str,
        share_divisor: i64,
        acceptance: Option<f64>,
        now: DateTime<Utc>,
    ) -> i64 {
        if let Some(entry) = budget.per_node.get_mut(node_id) {
            if entry.allocated > 0 {
                entry.last_check = now;
                return entry.allocated;
            }
        }

        let base = budget.config.total_quota / share_divisor.max(1);
        let factor = match acceptance {
            Some(r) if r < LOW_ACCEPTANCE_RATIO => 0.8,
            Some(r) if r > HIGH_ACCEPTANCE_RATIO => 1.2,
            _ => 1.0,
        };
        let share = (base as f64 * factor).floor() as i64;
        let granted = share
            .min(budget.remaining())
            .min(self.max_quota_per_node)
            .max(0);

        if granted > 0 {
            budget.used += granted;
            let entry = budget
                .per_node
                .entry(node_id.to_string())
                .or_insert(NodeAllocation {
                    allocated: 0,
                    last_check: now,
                });
            entry.allocated = granted;
            entry.last_check = now;
        }
        granted
    }

    /// Handle an ad-hoc grant (`required > 0`) between rebalance ticks.
    fn grant_extra(
        &self,
        budget: &mut ProfileBudget,
        node_id: &str,
        required: i64,
        now: DateTime<Utc>,
    ) -> i64 {
        let current = budget
            .per_node
            .get(node_id)
            .map(|a| a.allocated)
            .unwrap_or(0);
        let headroom = (self.max_quota_per_node - current).max(0);
        let granted = required.min(budget.remaining()).min(headroom).max(0);

        if granted > 0 {
            budget.used += granted;
            let entry = budget
                .per_node
                .entry(node_id.to_string())
                .or_insert(NodeAllocation {
                    allocated: 0,
                    last_check: now,
                });
            entry.allocated += granted;
            entry.last_check = now;
        }
        granted
    }

    /// Fold a node status report into the registry.
    pub fn update_node_status(&self, status: &NodeStatus) {
        self.update_node_status_at(status, Utc::now());
    }

    /// Clock-injected variant of [`update_node_status`](Self::update_node_status).
    pub fn update_node_status_at(&self, status: &NodeStatus, now: DateTime<Utc>) {
        let mut guard = self.inner.write();
        let record = guard
            .nodes
            .entry(status.node_id.clone())
            .or_insert_with(|| {
                info!(node_id = %status.node_id, "node registered");
                NodeRecord::new(status.node_id.clone(), now)
            });
        record.observe_report(status, now);
    }

    /// Redistribute each profile's budget equally across online nodes.
    ///
    /// Stateless by design: `used` resets, every online node gets
    /// `floor(total / online_count)`, offline nodes are zeroed.
    /// Overloaded nodes keep their last allocation until they recover
    /// or are swept offline.
    pub fn rebalance(&self) {
        self.rebalance_at(Utc::now());
    }

    /// Clock-injected variant of [`rebalance`](Self::rebalance).
    pub fn rebalance_at(&self, now: DateTime<Utc>) {
        let mut guard = self.inner.write();
        let Inner { profiles, nodes } = &mut *guard;

        let online = nodes.values().filter(|n| n.state.is_online()).count();
        if online == 0 {
            debug!("rebalance skipped, no online nodes");
            return;
        }

        for (profile_id, budget) in profiles.iter_mut() {
            budget.used = 0;
            let share = (budget.config.total_quota / online as i64).min(self.max_quota_per_node);

            for node in nodes.values() {
                match node.state {
                    NodeState::Online => {
                        let entry = budget
                            .per_node
                            .entry(node.node_id.clone())
                            .or_insert(NodeAllocation {
                                allocated: 0,
                                last_check: now,
                            });
                        entry.allocated = share;
                    }
                    NodeState::Offline => {
                        if let Some(entry) = budget.per_node.get_mut(&node.node_id) {
                            entry.allocated = 0;
                        }
                    }
                    NodeState::Unknown | NodeState::Overloaded => {}
                }
            }
            debug!(profile_id, online, share, "profile leases rebalanced");
        }
    }

    /// Mark nodes silent past the offline threshold as offline and
    /// zero their allocations across all profiles.
    pub fn sweep_offline(&self) {
        self.sweep_offline_at(Utc::now());
    }

    /// Clock-injected variant of [`sweep_offline`](Self::sweep_offline).
    pub fn sweep_offline_at(&self, now: DateTime<Utc>) {
        let mut guard = self.inner.write();
        let Inner { profiles, nodes } = &mut *guard;
        let threshold = to_delta(self.offline_threshold);

        for node in nodes.values_mut() {
            if node.state == NodeState::Offline {
                continue;
            }
            if now.signed_duration_since(node.last_seen) > threshold {
                warn!(node_id = %node.node_id, last_seen = %node.last_seen, "node went offline");
                node.state = NodeState::Offline;
                for budget in profiles.values_mut() {
                    if let Some(entry) = budget.per_node.get_mut(&node.node_id) {
                        entry.allocated = 0;
                    }
                }
            }
        }
    }

    /// Read-only snapshot of budgets and node records.
    pub fn status_snapshot(&self) -> QuotaStatusSnapshot {
        let guard = self.inner.read();

        let profiles = guard
            .profiles
            .iter()
            .map(|(id, budget)| {
                let nodes = budget
                    .per_node
                    .iter()
                    .map(|(node_id, alloc)| (node_id.clone(), alloc.allocated))
                    .collect();
                (
                    *id,
                    ProfileBudgetSnapshot {
                        total_quota: budget.config.total_quota,
                        used: budget.used,
                        available: budget.remaining(),
                        nodes,
                    },
                )
            })
            .collect();

        let nodes = guard
            .nodes
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    NodeRecordSnapshot {
                        state: record.state,
                        last_seen: record.last_seen,
                        acceptance_ratio: record.average_acceptance(),
                    },
                )
            })
            .collect();

        QuotaStatusSnapshot { profiles, nodes }
    }
}
