//! flowgate.toml configuration parser.
//!
//! The file layer keeps durations as human-readable strings ("5s",
//! "500ms") and is converted into typed configs before the core sees
//! it. Defaults mirror a small two-process deployment: coordinator on
//! 8080, agent on 8081.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowgateError, FlowgateResult};
use crate::types::{ProfileConfig, ProfileId, RateControlMethod};

/// Top-level flowgate.toml shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub coordinator: CoordinatorFileConfig,
    #[serde(default)]
    pub agent: AgentFileConfig,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorFileConfig {
    pub port: u16,
    pub max_total_quota: i64,
    pub max_quota_per_node: i64,
    pub refresh_interval: String,
    pub offline_threshold: String,
    pub monitor_interval: String,
    pub profiles: Vec<ProfileFileConfig>,
}

impl Default for CoordinatorFileConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_total_quota: 1_000_000,
            max_quota_per_node: 10_000,
            refresh_interval: "5s".to_string(),
            offline_threshold: "15s".to_string(),
            monitor_interval: "5s".to_string(),
            profiles: Vec::new(),
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFileConfig {
    pub port: u16,
    pub coordinator_url: String,
    pub report_interval: String,
    pub refresh_interval: String,
    /// Fractional reserve; a lease below this fraction of remaining
    /// headroom triggers an early refresh.
    pub quota_margin: f64,
    pub request_timeout: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub profiles: Vec<ProfileFileConfig>,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            coordinator_url: "http://127.0.0.1:8080".to_string(),
            report_interval: "3s".to_string(),
            refresh_interval: "5s".to_string(),
            quota_margin: 0.2,
            request_timeout: "2s".to_string(),
            batch_size: 100,
            max_retries: 3,
            profiles: Vec::new(),
        }
    }
}

/// `[[coordinator.profiles]]` / `[[agent.profiles]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFileConfig {
    pub profile_id: ProfileId,
    pub total_quota: i64,
    #[serde(default)]
    pub rate_limit: i64,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default)]
    pub rate_control_method: RateControlMethod,
}

fn default_window() -> String {
    "1s".to_string()
}

impl FileConfig {
    /// Load and parse a flowgate.toml.
    pub fn from_file(path: &Path) -> FlowgateResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowgateError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| FlowgateError::Config(e.to_string()))
    }
}

impl ProfileFileConfig {
    pub fn to_profile_config(&self) -> FlowgateResult<ProfileConfig> {
        Ok(ProfileConfig {
            total_quota: self.total_quota,
            rate_limit: self.rate_limit,
            burst: self.burst,
            description: self.description.clone(),
            window: parse_config_duration(&self.window, "window")?,
            rate_control_method: self.rate_control_method,
        })
    }
}

// ── Typed configs handed to the core ───────────────────────────────

/// Coordinator runtime configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub max_total_quota: i64,
    pub max_quota_per_node: i64,
    pub refresh_interval: Duration,
    pub offline_threshold: Duration,
    pub monitor_interval: Duration,
    pub profiles: HashMap<ProfileId, ProfileConfig>,
}

/// Agent runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub coordinator_url: String,
    pub report_interval: Duration,
    pub refresh_interval: Duration,
    pub quota_margin: f64,
    pub request_timeout: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub profiles: HashMap<ProfileId, ProfileConfig>,
}

impl CoordinatorFileConfig {
    pub fn to_config(&self) -> FlowgateResult<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            port: self.port,
            max_total_quota: self.max_total_quota,
            max_quota_per_node: self.max_quota_per_node,
            refresh_interval: parse_config_duration(&self.refresh_interval, "refresh_interval")?,
            offline_threshold: parse_config_duration(&self.offline_threshold, "offline_threshold")?,
            monitor_interval: parse_config_duration(&self.monitor_interval, "monitor_interval")?,
            profiles: profile_table(&self.profiles)?,
        })
    }
}

impl AgentFileConfig {
    pub fn to_config(&self) -> FlowgateResult<AgentConfig> {
        Ok(AgentConfig {
            port: self.port,
            coordinator_url: self.coordinator_url.clone(),
            report_interval: parse_config_duration(&self.report_interval, "report_interval")?,
            refresh_interval: parse_config_duration(&self.refresh_interval, "refresh_interval")?,
            quota_margin: self.quota_margin,
            request_timeout: parse_config_duration(&self.request_timeout, "request_timeout")?,
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            profiles: profile_table(&self.profiles)?,
        })
    }
}

fn profile_table(
    profiles: &[ProfileFileConfig],
) -> FlowgateResult<HashMap<ProfileId, ProfileConfig>> {
    let mut table = HashMap::with_capacity(profiles.len());
    for p in profiles {
        if table.insert(p.profile_id, p.to_profile_config()?).is_some() {
            return Err(FlowgateError::Config(format!(
                "duplicate profile_id {}",
                p.profile_id
            )));
        }
    }
    Ok(table)
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn parse_config_duration(s: &str, field: &str) -> FlowgateResult<Duration> {
    parse_duration(s)
        .ok_or_else(|| FlowgateError::Config(format!("invalid duration for {field}: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_two_process_deployment() {
        let config = FileConfig::default();
        assert_eq!(config.coordinator.port, 8080);
        assert_eq!(config.agent.port, 8081);
        assert_eq!(config.agent.max_retries, 3);

        let typed = config.coordinator.to_config().unwrap();
        assert_eq!(typed.refresh_interval, Duration::from_secs(5));
        assert_eq!(typed.offline_threshold, Duration::from_secs(15));
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
[coordinator]
port = 9000
refresh_interval = "2s"

[[coordinator.profiles]]
profile_id = 1
total_quota = 1000
rate_limit = 100
burst = 100
rate_control_method = "token_bucket"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.coordinator.port, 9000);

        let typed = config.coordinator.to_config().unwrap();
        let profile = &typed.profiles[&1];
        assert_eq!(profile.total_quota, 1000);
        assert_eq!(profile.rate_control_method, RateControlMethod::TokenBucket);
        assert_eq!(profile.window, Duration::from_secs(1));
    }

    #[test]
    fn duplicate_profile_id_rejected() {
        let profiles = vec![
            ProfileFileConfig {
                profile_id: 1,
                total_quota: 100,
                rate_limit: 0,
                burst: 0,
                description: String::new(),
                window: "1s".to_string(),
                rate_control_method: RateControlMethod::None,
            };
            2
        ];
        assert!(profile_table(&profiles).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("bogus"), None);
    }

    #[test]
    fn invalid_duration_surfaces_field_name() {
        let mut file = CoordinatorFileConfig::default();
        file.monitor_interval = "soon".to_string();
        let err = file.to_config().unwrap_err();
        assert!(err.to_string().contains("monitor_interval"));
    }
}
