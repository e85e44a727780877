//! flowgate-types — shared types for the flowgate throttling service.
//!
//! Domain types (profiles, node state, counters), the JSON wire
//! contract between agents and the coordinator, error kinds, and the
//! typed configuration surface with its TOML loader.

mod config;
mod error;
mod types;

pub use config::*;
pub use error::*;
pub use types::*;
