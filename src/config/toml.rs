//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::parse_duration_ms;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Network
    if let Some(ref host) = cli.client_host {
        config.network.client_host = host.clone();
    }
    if let Some(port) = cli.discovery_port {
        config.network.discovery_port = port;
    }
    if let Some(bind) = cli.bind {
        config.network.bind_address = bind;
    }
    if let Some(min) = cli.min_port {
        config.network.min_port = min;
    }
    if let Some(max) = cli.max_port {
        config.network.max_port = max;
    }

    // Rendezvous
    if let Some(retries) = cli.retries {
        config.rendezvous.retries = retries;
    }
    if let Some(ref timeout) = cli.retry_timeout {
        config.rendezvous.retry_timeout_ms = parse_duration_ms(timeout)
            .context("Invalid retry timeout")?;
    }

    // Session
    if let Some(ref timeout) = cli.idle_timeout {
        config.session.idle_timeout_ms = parse_duration_ms(timeout)
            .context("Invalid idle timeout")?;
    }
    if let Some(ref timeout) = cli.worker_accept_timeout {
        config.session.worker_accept_timeout_ms = Some(
            parse_duration_ms(timeout).context("Invalid worker accept timeout")?,
        );
    }
    if let Some(min) = cli.min_workers {
        config.session.min_workers = min;
    }
    if let Some(max) = cli.max_workers {
        config.session.max_workers = max;
    }

    Ok(config)
}

/// Build the effective configuration: defaults, then file, then CLI
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, base)
}
