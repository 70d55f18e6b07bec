//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_network(&config.network)?;
    validate_rendezvous(&config.rendezvous)?;
    validate_session(&config.session)?;

    Ok(())
}

/// Validate network configuration
pub fn validate_network(network: &NetworkConfig) -> Result<()> {
    if network.client_host.trim().is_empty() {
        anyhow::bail!("client_host must not be empty");
    }

    if network.min_port == 0 {
        anyhow::bail!("min_port must be at least 1");
    }

    if network.min_port >= network.max_port {
        anyhow::bail!(
            "port range [{}, {}) is empty",
            network.min_port,
            network.max_port
        );
    }

    if network.discovery_port == 0 {
        anyhow::bail!("discovery_port must be at least 1");
    }

    Ok(())
}

/// Validate rendezvous configuration
pub fn validate_rendezvous(rendezvous: &RendezvousConfig) -> Result<()> {
    if rendezvous.retries == 0 {
        anyhow::bail!("retries must be at least 1");
    }

    if rendezvous.retry_timeout_ms == 0 {
        anyhow::bail!("retry_timeout_ms must be greater than 0");
    }

    Ok(())
}

/// Validate session configuration
pub fn validate_session(session: &SessionConfig) -> Result<()> {
    if session.idle_timeout_ms == 0 {
        anyhow::bail!("idle_timeout_ms must be greater than 0");
    }

    if session.worker_accept_timeout_ms == Some(0) {
        anyhow::bail!("worker_accept_timeout_ms must be greater than 0");
    }

    if session.worker_bind_timeout_ms == 0 {
        anyhow::bail!("worker_bind_timeout_ms must be greater than 0");
    }

    if session.shutdown_timeout_ms == 0 {
        anyhow::bail!("shutdown_timeout_ms must be greater than 0");
    }

    if session.min_workers == 0 {
        anyhow::bail!("min_workers must be at least 1");
    }

    if session.min_workers > session.max_workers {
        anyhow::bail!(
            "min_workers ({}) must not exceed max_workers ({})",
            session.min_workers,
            session.max_workers
        );
    }

    if session.max_workers > i32::MAX as u32 {
        anyhow::bail!("max_workers ({}) does not fit in a protocol message", session.max_workers);
    }

    Ok(())
}
