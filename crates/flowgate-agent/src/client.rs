//! HTTP client for the coordinator's quota and status endpoints.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use flowgate_ratelimit::ExponentialBackoff;
use flowgate_types::{
    FlowgateError, FlowgateResult, NodeId, NodeStatus, ProfileQuota, QuotaRequest, QuotaResponse,
};

/// Error body returned by the coordinator on 4xx/5xx.
#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for one coordinator, bound to one node identity.
pub struct CoordinatorClient {
    base_url: String,
    node_id: NodeId,
    http: reqwest::Client,
}

impl CoordinatorClient {
    /// Build a client with the given request deadline.
    pub fn new(
        base_url: impl Into<String>,
        node_id: impl Into<String>,
        timeout: Duration,
    ) -> FlowgateResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FlowgateError::Transport(e.to_string()))?;

        let base_url = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            node_id: node_id.into(),
            http,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Request or refresh leases for the given profiles.
    pub async fn request_quota(
        &self,
        quotas: Vec<ProfileQuota>,
    ) -> FlowgateResult<QuotaResponse> {
        let req = QuotaRequest {
            node_id: self.node_id.clone(),
            request_id: format!("req-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            quotas,
        };

        let resp = self
            .http
            .post(format!("{}/api/v1/quota/check", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(map_transport)?;

        let resp = check_status(resp).await?;
        resp.json::<QuotaResponse>()
            .await
            .map_err(|e| FlowgateError::Transport(format!("decode response: {e}")))
    }

    /// Report this node's status to the coordinator.
    pub async fn report_status(&self, status: &NodeStatus) -> FlowgateResult<()> {
        let resp = self
            .http
            .post(format!("{}/api/v1/status", self.base_url))
            .json(status)
            .send()
            .await
            .map_err(map_transport)?;

        check_status(resp).await?;
        Ok(())
    }

    /// Probe the coordinator's liveness endpoint.
    pub async fn health(&self) -> FlowgateResult<()> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(map_transport)?;

        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> FlowgateResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    if status == reqwest::StatusCode::BAD_REQUEST {
        Err(FlowgateError::InvalidRequest(message))
    } else {
        Err(FlowgateError::Transport(format!(
            "coordinator returned {status}: {message}"
        )))
    }
}

fn map_transport(e: reqwest::Error) -> FlowgateError {
    if e.is_timeout() {
        FlowgateError::RequestTimeout
    } else {
        FlowgateError::Transport(e.to_string())
    }
}

/// Retry `op` with exponential backoff (1 s doubling, capped at 30 s).
///
/// Intended for coarse operations such as health probing; the lease
/// refresh path uses its own fixed one-second retry.
pub async fn retry_with_backoff<T, F, Fut>(mut op: F, max_retries: u32) -> FlowgateResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FlowgateResult<T>>,
{
    let backoff = ExponentialBackoff::default();
    let mut last_err = FlowgateError::Transport("no attempts made".to_string());

    for attempt in 0..max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, error = %e, "operation failed, backing off");
                last_err = e;
            }
        }
        if attempt + 1 < max_retries {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }
    Err(last_err)
}
