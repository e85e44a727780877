//! flowgate-agent — the enforcement side of the lease system.
//!
//! Each application node runs one agent. The agent admits or rejects
//! work locally against its leased quota shares and per-profile rate
//! limiters, refreshes its leases from the coordinator on a periodic
//! loop, and reports its admission counters out of band. When the
//! coordinator is unreachable the agent keeps operating on its
//! last-known leases.

mod agent;
mod client;
mod stats;

pub use agent::NodeAgent;
pub use client::{retry_with_backoff, CoordinatorClient};
pub use stats::system_usage;
