//! Node registry — liveness state machine and acceptance history.
//!
//! Records are created lazily the first time a node is seen and are
//! never removed; a silent node is marked offline by the liveness
//! sweep and flips back to online on its next status report.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use flowgate_types::{NodeId, NodeState, NodeStatus};

/// Number of acceptance-ratio observations retained per node.
pub(crate) const ACCEPTANCE_WINDOW: usize = 10;

/// Average acceptance ratio above which an overloaded node is
/// considered recovered.
const OVERLOAD_RECOVERY_RATIO: f64 = 0.8;

/// Coordinator-side view of one application node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub state: NodeState,
    pub last_seen: DateTime<Utc>,
    /// Rolling window of recent acceptance ratios, newest last.
    acceptance: VecDeque<f64>,
}

impl NodeRecord {
    pub fn new(node_id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            node_id,
            state: NodeState::Unknown,
            last_seen: now,
            acceptance: VecDeque::with_capacity(ACCEPTANCE_WINDOW),
        }
    }

    /// Fold a status report into the record.
    ///
    /// Refreshes `last_seen`, appends the derived acceptance ratio,
    /// and advances the liveness state machine: any report brings an
    /// unknown or offline node online, an overload signal is sticky
    /// until the acceptance average recovers.
    pub fn observe_report(&mut self, status: &NodeStatus, now: DateTime<Utc>) {
        let ratio = status.counter.accepted as f64 / status.counter.total.max(1) as f64;
        self.push_ratio(ratio);
        self.last_seen = now;

        let next = match (self.state, status.state) {
            (_, NodeState::Overloaded) => NodeState::Overloaded,
            (NodeState::Overloaded, _) => {
                if self.average_acceptance().unwrap_or(0.0) > OVERLOAD_RECOVERY_RATIO {
                    NodeState::Online
                } else {
                    NodeState::Overloaded
                }
            }
            _ => NodeState::Online,
        };

        if next != self.state {
            debug!(node_id = %self.node_id, from = ?self.state, to = ?next, "node state changed");
        }
        self.state = next;
    }

    pub(crate) fn push_ratio(&mut self, ratio: f64) {
        if self.acceptance.len() >= ACCEPTANCE_WINDOW {
            self.acceptance.pop_front();
        }
        self.acceptance.push_back(ratio);
    }

    /// Average of the retained acceptance ratios, if any.
    pub fn average_acceptance(&self) -> Option<f64> {
        if self.acceptance.is_empty() {
            return None;
        }
        Some(self.acceptance.iter().sum::<f64>() / self.acceptance.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::CounterSnapshot;

    fn report(state: NodeState, total: u64, accepted: u64) -> NodeStatus {
        NodeStatus {
            node_id: "node-1".to_string(),
            state,
            counter: CounterSnapshot {
                total,
                accepted,
                rejected: total - accepted,
            },
            last_seen: Utc::now(),
            cpu_usage: 0.1,
            memory_usage: 0.2,
            quota_left: 0,
        }
    }

    #[test]
    fn first_report_brings_node_online() {
        let now = Utc::now();
        let mut record = NodeRecord::new("node-1".to_string(), now);
        assert_eq!(record.state, NodeState::Unknown);

        record.observe_report(&report(NodeState::Online, 10, 10), now);
        assert_eq!(record.state, NodeState::Online);
        assert_eq!(record.average_acceptance(), Some(1.0));
    }

    #[test]
    fn report_refreshes_last_seen() {
        let now = Utc::now();
        let mut record = NodeRecord::new("node-1".to_string(), now);

        let later = now + chrono::TimeDelta::seconds(7);
        record.observe_report(&report(NodeState::Online, 1, 1), later);
        assert_eq!(record.last_seen, later);
    }

    #[test]
    fn overload_is_sticky_until_recovery() {
        let now = Utc::now();
        let mut record = NodeRecord::new("node-1".to_string(), now);

        // Overloaded with a poor acceptance ratio.
        record.observe_report(&report(NodeState::Overloaded, 100, 10), now);
        assert_eq!(record.state, NodeState::Overloaded);

        // A normal report with a still-poor average stays overloaded.
        record.observe_report(&report(NodeState::Online, 100, 20), now);
        assert_eq!(record.state, NodeState::Overloaded);

        // Enough good reports raise the average past the threshold.
        for _ in 0..8 {
            record.observe_report(&report(NodeState::Online, 100, 100), now);
        }
        assert_eq!(record.state, NodeState::Online);
    }

    #[test]
    fn acceptance_window_evicts_oldest() {
        let now = Utc::now();
        let mut record = NodeRecord::new("node-1".to_string(), now);

        // Fill the window with zeros, then push ones past capacity.
        for _ in 0..ACCEPTANCE_WINDOW {
            record.push_ratio(0.0);
        }
        for _ in 0..ACCEPTANCE_WINDOW {
            record.push_ratio(1.0);
        }
        assert_eq!(record.average_acceptance(), Some(1.0));
    }

    #[test]
    fn zero_total_counter_counts_as_zero_ratio() {
        let now = Utc::now();
        let mut record = NodeRecord::new("node-1".to_string(), now);
        record.observe_report(&report(NodeState::Online, 0, 0), now);
        assert_eq!(record.average_acceptance(), Some(0.0));
    }
}
