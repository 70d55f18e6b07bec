//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode (default) - serve one client session
    Coordinator,
    /// Client mode - drive a session against a coordinator and verify its answers
    Client,
}

/// numpool - stream-summation coordinator
#[derive(Parser, Debug)]
#[command(name = "numpool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or client
    #[arg(long, value_enum, default_value = "coordinator")]
    pub mode: ExecutionMode,

    /// Client host name or address (coordinator mode)
    #[arg(value_name = "CLIENT_HOST")]
    pub client_host: Option<String>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Network Options ===
    /// Client UDP discovery port
    #[arg(long, env = "NUMPOOL_DISCOVERY_PORT")]
    pub discovery_port: Option<u16>,

    /// Local address to listen on
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// First port tried when binding listeners
    #[arg(long)]
    pub min_port: Option<u16>,

    /// End of the port search range (exclusive)
    #[arg(long)]
    pub max_port: Option<u16>,

    // === Rendezvous Options ===
    /// Discovery datagrams sent before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Wait after each discovery datagram (e.g., 500ms, 5s)
    #[arg(long)]
    pub retry_timeout: Option<String>,

    // === Session Options ===
    /// Session idle timeout (e.g., 60s, 1m)
    #[arg(long)]
    pub idle_timeout: Option<String>,

    /// How long a worker waits for its client stream (defaults to the idle timeout)
    #[arg(long)]
    pub worker_accept_timeout: Option<String>,

    /// Minimum accepted worker count
    #[arg(long)]
    pub min_workers: Option<u32>,

    /// Maximum accepted worker count
    #[arg(long)]
    pub max_workers: Option<u32>,

    // === Client Options ===
    /// Number of workers to request (client mode)
    #[arg(short = 'w', long, default_value = "3")]
    pub workers: u32,

    /// Numbers streamed to each worker (client mode)
    #[arg(short = 'n', long, default_value = "100")]
    pub numbers_per_worker: usize,

    /// RNG seed for generated numbers (client mode)
    #[arg(long, default_value = "42")]
    pub seed: u64,

    // === Output ===
    /// Print the session summary (coordinator) or client report as JSON
    #[arg(long)]
    pub json: bool,

    // === Logging ===
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Client {
            if self.workers == 0 {
                anyhow::bail!("workers must be at least 1");
            }
            if self.numbers_per_worker == 0 {
                anyhow::bail!("numbers_per_worker must be at least 1");
            }
        }

        if let (Some(min), Some(max)) = (self.min_port, self.max_port) {
            if min >= max {
                anyhow::bail!("min_port ({}) must be below max_port ({})", min, max);
            }
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("unknown log level: {}", other),
        }

        Ok(())
    }
}
