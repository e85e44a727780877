//! flowgated — the flowgate daemon.
//!
//! Single binary that runs either tier of the throttling service:
//!
//! - **coordinator** — owns per-profile budgets, issues leases, and
//!   sweeps node liveness
//! - **agent** — enforces admission locally on an application node and
//!   keeps its leases fresh
//!
//! # Usage
//!
//! ```text
//! flowgated coordinator --config flowgate.toml
//! flowgated agent --config flowgate.toml --coordinator-url http://10.0.0.1:8080
//! ```

mod agent_mode;
mod coordinator_mode;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use flowgate_types::FileConfig;

#[derive(Parser)]
#[command(name = "flowgated", about = "Flowgate throttling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the central coordinator.
    Coordinator {
        /// Path to flowgate.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run an application-node agent.
    Agent {
        /// Path to flowgate.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// This node's identifier; generated when omitted.
        #[arg(long)]
        node_id: Option<String>,

        /// Coordinator base URL (overrides the config file).
        #[arg(long)]
        coordinator_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowgated=debug,flowgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Coordinator { config, port } => {
            let file = load_config(config.as_deref())?;
            let mut cfg = file.coordinator.to_config()?;
            if let Some(port) = port {
                cfg.port = port;
            }
            coordinator_mode::run_coordinator(cfg).await
        }
        Command::Agent {
            config,
            port,
            node_id,
            coordinator_url,
        } => {
            let file = load_config(config.as_deref())?;
            let mut cfg = file.agent.to_config()?;
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(url) = coordinator_url {
                cfg.coordinator_url = url;
            }
            let node_id = node_id.unwrap_or_else(|| generate_node_id(cfg.port));
            agent_mode::run_agent(cfg, node_id).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FileConfig> {
    match path {
        Some(path) => Ok(FileConfig::from_file(path)?),
        None => Ok(FileConfig::default()),
    }
}

/// Generate a node ID from the listen port and the current time.
fn generate_node_id(port: u16) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    port.hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    format!("node-{:08x}", hasher.finish() as u32)
}
