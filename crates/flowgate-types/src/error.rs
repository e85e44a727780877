//! Error kinds raised by the flowgate core.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{NodeId, ProfileId};

/// Result type alias for flowgate operations.
pub type FlowgateResult<T> = Result<T, FlowgateError>;

/// Errors raised by the coordinator, the agent, or the client between
/// them. Admission rejections are returned without side effect.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowgateError {
    #[error("profile {0} not configured")]
    ProfileUnknown(ProfileId),

    #[error("rate limited")]
    RateLimited,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("node {0} is offline")]
    NodeOffline(NodeId),

    #[error("request timed out")]
    RequestTimeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("system overloaded")]
    Overloaded,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no profiles configured")]
    NoProfiles,

    #[error("lease refresh stale: last refresh {0:?}")]
    StaleLease(Option<DateTime<Utc>>),

    #[error("config error: {0}")]
    Config(String),
}
