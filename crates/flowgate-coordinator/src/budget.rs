//! Per-profile budget accounting and the coordinator-side rate gate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use flowgate_types::{NodeId, ProfileConfig, RateControlMethod};

/// Lease slice held by one node for one profile.
#[derive(Debug, Clone)]
pub(crate) struct NodeAllocation {
    pub allocated: i64,
    pub last_check: DateTime<Utc>,
}

/// Mutable budget state for one profile.
#[derive(Debug)]
pub(crate) struct ProfileBudget {
    pub config: ProfileConfig,
    /// Grants issued in the current refresh window. Reset by rebalance.
    pub used: i64,
    pub per_node: HashMap<NodeId, NodeAllocation>,
    pub gate: RateGate,
}

impl ProfileBudget {
    pub fn new(config: ProfileConfig, now: DateTime<Utc>) -> Self {
        let gate = RateGate::for_method(&config, now);
        Self {
            config,
            used: 0,
            per_node: HashMap::new(),
            gate,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.config.total_quota - self.used
    }
}

/// Wall-clock rate control applied before budget accounting.
///
/// A limited request never touches `used` — rate rejection is
/// independent of quota state.
#[derive(Debug)]
pub(crate) enum RateGate {
    None,
    TokenBucket {
        tokens: i64,
        last_window: DateTime<Utc>,
    },
    FixedWindow {
        count: i64,
        last_window: DateTime<Utc>,
    },
}

impl RateGate {
    pub fn for_method(config: &ProfileConfig, now: DateTime<Utc>) -> Self {
        match config.rate_control_method {
            RateControlMethod::None => RateGate::None,
            RateControlMethod::TokenBucket => RateGate::TokenBucket {
                tokens: config.burst,
                last_window: now,
            },
            RateControlMethod::FixedWindow => RateGate::FixedWindow {
                count: 0,
                last_window: now,
            },
        }
    }

    /// Returns `true` when the request must be rejected as rate
    /// limited. A passing request consumes one token / count slot.
    pub fn is_limited(&mut self, config: &ProfileConfig, now: DateTime<Utc>) -> bool {
        let window = to_delta(config.window);
        match self {
            RateGate::None => false,
            RateGate::TokenBucket {
                tokens,
                last_window,
            } => {
                let elapsed = now.signed_duration_since(*last_window);
                if elapsed > window {
                    *tokens = config.burst;
                    *last_window = now;
                } else {
                    let secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
                    let credit = (secs * config.rate_limit as f64).floor() as i64;
                    *tokens = (*tokens + credit).min(config.burst);
                }
                if *tokens < 1 {
                    return true;
                }
                *tokens -= 1;
                false
            }
            RateGate::FixedWindow { count, last_window } => {
                let elapsed = now.signed_duration_since(*last_window);
                if elapsed > window {
                    *count = 0;
                    *last_window = now;
                }
                if *count >= config.rate_limit {
                    return true;
                }
                *count += 1;
                false
            }
        }
    }
}

pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}
