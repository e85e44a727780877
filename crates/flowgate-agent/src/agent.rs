//! Node agent — local admission and lease lifecycle.
//!
//! The local quota map is the agent's only mutable state. Admission
//! runs entirely under the write lock so the check and the debit are
//! observably atomic: two concurrent requests can never both pass the
//! same headroom check.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use flowgate_ratelimit::{limiter_for, RateLimiter};
use flowgate_types::{
    AdmissionCounter, AdmissionStatus, AgentConfig, FlowgateError, FlowgateResult, NodeId,
    NodeQuotaStatus, NodeState, NodeStatus, ProfileId, ProfileQuota, ProfileStatus, WorkRequest,
    WorkResponse,
};

use crate::client::CoordinatorClient;
use crate::stats::system_usage;

/// Delay between lease refresh retry attempts.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One profile's lease as held locally.
struct LocalQuota {
    /// Lease amount last returned by the coordinator.
    allocated: i64,
    /// Locally debited since the last refresh.
    used: i64,
    last_refresh: Option<DateTime<Utc>>,
    limiter: Box<dyn RateLimiter>,
}

impl LocalQuota {
    fn available(&self) -> i64 {
        self.allocated - self.used
    }
}

/// The application-node agent.
pub struct NodeAgent {
    node_id: NodeId,
    client: CoordinatorClient,
    quotas: RwLock<HashMap<ProfileId, LocalQuota>>,
    counter: AdmissionCounter,
    refresh_interval: Duration,
    max_retries: u32,
    quota_margin: f64,
    /// Pinged when the margin reserve is breached, waking the refresh
    /// loop ahead of its periodic tick.
    refresh_hint: Notify,
}

impl NodeAgent {
    pub fn new(config: &AgentConfig, client: CoordinatorClient) -> Self {
        let quotas = config
            .profiles
            .iter()
            .map(|(id, profile)| {
                (
                    *id,
                    LocalQuota {
                        allocated: 0,
                        used: 0,
                        last_refresh: None,
                        limiter: limiter_for(profile),
                    },
                )
            })
            .collect();

        Self {
            node_id: client.node_id().to_string(),
            client,
            quotas: RwLock::new(quotas),
            counter: AdmissionCounter::default(),
            refresh_interval: config.refresh_interval,
            max_retries: config.max_retries,
            quota_margin: config.quota_margin,
            refresh_hint: Notify::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn counter(&self) -> &AdmissionCounter {
        &self.counter
    }

    /// Decide admission for a work request.
    ///
    /// Checks run in request order: unknown profile, then the profile's
    /// rate limiter, then lease headroom. The debit is all-or-nothing —
    /// a rejection leaves every profile untouched.
    pub fn handle_request(&self, req: &WorkRequest) -> WorkResponse {
        let mut quotas = self.quotas.write();

        if let Err(e) = check_admission(&quotas, req) {
            debug!(node_id = %self.node_id, request_id = %req.request_id, error = %e, "request rejected");
            self.counter.record_rejected();
            return self.respond(req, rejection_status(&e));
        }

        for (profile_id, required) in &req.quotas {
            if let Some(quota) = quotas.get_mut(profile_id) {
                quota.used += required;
            }
        }
        self.counter.record_accepted();

        if self.margin_breached(&quotas) {
            debug!(node_id = %self.node_id, "quota margin breached, hinting early refresh");
            self.refresh_hint.notify_one();
        }

        self.respond(req, AdmissionStatus::Admitted)
    }

    fn respond(&self, req: &WorkRequest, status: AdmissionStatus) -> WorkResponse {
        WorkResponse {
            request_id: req.request_id.clone(),
            status,
        }
    }

    fn margin_breached(&self, quotas: &HashMap<ProfileId, LocalQuota>) -> bool {
        if self.quota_margin <= 0.0 {
            return false;
        }
        quotas.values().any(|q| {
            q.allocated > 0 && (q.available() as f64) < q.allocated as f64 * self.quota_margin
        })
    }

    /// Refresh all leases from the coordinator.
    ///
    /// Retries transport failures up to `max_retries` times with a
    /// fixed one-second delay. On final failure local state is left
    /// untouched — the agent keeps serving on its last-known leases.
    pub async fn refresh_quotas(&self) -> FlowgateResult<()> {
        let request: Vec<ProfileQuota> = {
            let quotas = self.quotas.read();
            quotas
                .keys()
                .map(|id| ProfileQuota {
                    profile_id: *id,
                    required: 0,
                })
                .collect()
        };
        if request.is_empty() {
            return Err(FlowgateError::NoProfiles);
        }

        let mut result = Err(FlowgateError::Transport("no attempts made".to_string()));
        for attempt in 0..self.max_retries.max(1) {
            match self.client.request_quota(request.clone()).await {
                Ok(resp) => {
                    result = Ok(resp);
                    break;
                }
                Err(e) => {
                    warn!(node_id = %self.node_id, attempt, error = %e, "lease refresh attempt failed");
                    result = Err(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                    }
                }
            }
        }
        let resp = result?;

        let now = Utc::now();
        let mut quotas = self.quotas.write();
        for grant in &resp.quotas {
            let Some(quota) = quotas.get_mut(&grant.profile_id) else {
                continue;
            };
            if grant.rate_limited {
                // The coordinator throttled this refresh; keep serving
                // on the last-known lease.
                debug!(profile_id = grant.profile_id, "refresh rate limited by coordinator");
                continue;
            }
            quota.allocated = grant.granted;
            quota.used = 0;
            quota.last_refresh = Some(now);
        }
        debug!(node_id = %self.node_id, profiles = resp.quotas.len(), "leases refreshed");
        Ok(())
    }

    /// Snapshot of every profile's local lease state.
    pub fn get_status(&self) -> NodeQuotaStatus {
        let quotas = self.quotas.read();
        let snapshot: BTreeMap<ProfileId, ProfileStatus> = quotas
            .iter()
            .map(|(id, q)| {
                (
                    *id,
                    ProfileStatus {
                        allocated: q.allocated,
                        used: q.used,
                        available: q.available(),
                        last_refresh: q.last_refresh,
                    },
                )
            })
            .collect();

        NodeQuotaStatus {
            node_id: self.node_id.clone(),
            quotas: snapshot,
        }
    }

    /// Verify the lease pipeline is intact.
    ///
    /// Fails when no profiles are configured or when any lease has not
    /// been refreshed within twice the refresh interval.
    pub fn health_check(&self) -> FlowgateResult<()> {
        self.health_check_at(Utc::now())
    }

    /// Clock-injected variant of [`health_check`](Self::health_check).
    pub fn health_check_at(&self, now: DateTime<Utc>) -> FlowgateResult<()> {
        let quotas = self.quotas.read();
        if quotas.is_empty() {
            return Err(FlowgateError::NoProfiles);
        }

        let stale_after = self.refresh_interval * 2;
        for quota in quotas.values() {
            let fresh = quota.last_refresh.is_some_and(|t| {
                now.signed_duration_since(t)
                    .to_std()
                    .map(|d| d <= stale_after)
                    .unwrap_or(true)
            });
            if !fresh {
                return Err(FlowgateError::StaleLease(quota.last_refresh));
            }
        }
        Ok(())
    }

    /// Build the periodic status report for the coordinator.
    pub fn node_status(&self, cpu_usage: f64, memory_usage: f64) -> NodeStatus {
        let quota_left = {
            let quotas = self.quotas.read();
            quotas.values().map(|q| q.available().max(0)).sum()
        };

        NodeStatus {
            node_id: self.node_id.clone(),
            state: NodeState::Online,
            counter: self.counter.snapshot(),
            last_seen: Utc::now(),
            cpu_usage,
            memory_usage,
            quota_left,
        }
    }

    /// Run the lease refresh loop until shutdown.
    pub async fn run_refresh(&self, mut shutdown: watch::Receiver<bool>) {
        info!(node_id = %self.node_id, interval = ?self.refresh_interval, "lease refresh loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {
                    if let Err(e) = self.refresh_quotas().await {
                        warn!(node_id = %self.node_id, error = %e, "lease refresh failed");
                    }
                }
                _ = self.refresh_hint.notified() => {
                    if let Err(e) = self.refresh_quotas().await {
                        warn!(node_id = %self.node_id, error = %e, "early lease refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(node_id = %self.node_id, "refresh loop shutting down");
                    break;
                }
            }
        }
    }

    /// Run the status report loop until shutdown.
    pub async fn run_report(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(node_id = %self.node_id, ?interval, "status report loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let (cpu, memory) = system_usage();
                    let status = self.node_status(cpu, memory);
                    if let Err(e) = self.client.report_status(&status).await {
                        warn!(node_id = %self.node_id, error = %e, "status report failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(node_id = %self.node_id, "report loop shutting down");
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn install_lease(
        &self,
        profile_id: ProfileId,
        allocated: i64,
        last_refresh: Option<DateTime<Utc>>,
    ) {
        let mut quotas = self.quotas.write();
        if let Some(quota) = quotas.get_mut(&profile_id) {
            quota.allocated = allocated;
            quota.used = 0;
            quota.last_refresh = last_refresh;
        }
    }
}

/// Validate every named profile without mutating lease state. The
/// rate limiters do consume a permit per consulted profile, counting
/// the attempt.
fn check_admission(
    quotas: &HashMap<ProfileId, LocalQuota>,
    req: &WorkRequest,
) -> FlowgateResult<()> {
    for (profile_id, required) in &req.quotas {
        let Some(quota) = quotas.get(profile_id) else {
            return Err(FlowgateError::ProfileUnknown(*profile_id));
        };
        if !quota.limiter.allow() {
            return Err(FlowgateError::RateLimited);
        }
        if quota.available() < *required {
            return Err(FlowgateError::QuotaExceeded);
        }
    }
    Ok(())
}

fn rejection_status(err: &FlowgateError) -> AdmissionStatus {
    match err {
        FlowgateError::ProfileUnknown(_) => AdmissionStatus::ProfileUnknown,
        FlowgateError::RateLimited => AdmissionStatus::RateLimited,
        _ => AdmissionStatus::QuotaExceeded,
    }
}
