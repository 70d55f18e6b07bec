//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub rendezvous: RendezvousConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Addresses and ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Client host name or address the discovery datagram is sent to
    #[serde(default = "default_client_host")]
    pub client_host: String,
    /// Local address the coordinator and workers listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Client's well-known UDP discovery port
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// First port tried when binding a listener
    #[serde(default = "default_min_port")]
    pub min_port: u16,
    /// End of the port search range (exclusive)
    #[serde(default = "default_max_port")]
    pub max_port: u16,
}

fn default_client_host() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_discovery_port() -> u16 {
    3126
}

fn default_min_port() -> u16 {
    1024
}

fn default_max_port() -> u16 {
    65535
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            client_host: default_client_host(),
            bind_address: default_bind_address(),
            discovery_port: default_discovery_port(),
            min_port: default_min_port(),
            max_port: default_max_port(),
        }
    }
}

/// Primary-channel discovery handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousConfig {
    /// Datagrams sent before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Accept timeout after each datagram (milliseconds)
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
}

fn default_retries() -> u32 {
    5
}

fn default_retry_timeout_ms() -> u64 {
    5000
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_timeout_ms: default_retry_timeout_ms(),
        }
    }
}

impl RendezvousConfig {
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

/// Session limits and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Query and data idle timeout (milliseconds)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How long a worker waits for the client to connect (defaults to the idle timeout)
    #[serde(default)]
    pub worker_accept_timeout_ms: Option<u64>,
    /// Bound on waiting for each worker to drain at shutdown (milliseconds)
    /// How long the coordinator waits for each worker to bind (milliseconds)
    #[serde(default = "default_worker_bind_timeout_ms")]
    pub worker_bind_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_min_workers")]
    pub min_workers: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_worker_bind_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_min_workers() -> u32 {
    2
}

fn default_max_workers() -> u32 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            worker_accept_timeout_ms: None,
            worker_bind_timeout_ms: default_worker_bind_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn worker_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_accept_timeout_ms.unwrap_or(self.idle_timeout_ms))
    }

    pub fn worker_bind_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_bind_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Whether a client-requested worker count is within bounds
    pub fn accepts_worker_count(&self, count: i32) -> bool {
        count >= self.min_workers as i32 && count <= self.max_workers as i32
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Client host:     {}:{}",
            self.network.client_host, self.network.discovery_port
        )?;
        writeln!(f, "Bind address:    {}", self.network.bind_address)?;
        writeln!(f, "Port range:      [{}, {})", self.network.min_port, self.network.max_port)?;
        writeln!(
            f,
            "Discovery:       {} retries x {}ms",
            self.rendezvous.retries, self.rendezvous.retry_timeout_ms
        )?;
        writeln!(f, "Idle timeout:    {}ms", self.session.idle_timeout_ms)?;
        write!(
            f,
            "Workers:         {}-{}",
            self.session.min_workers, self.session.max_workers
        )
    }
}
