//! numpool CLI entry point

use anyhow::{Context, Result};
use numpool::config::cli::{Cli, ExecutionMode};
use numpool::config::{toml, validator, Config};
use numpool::distributed::client::{run_load, DiscoveryListener, LoadPlan};
use numpool::distributed::Coordinator;
use numpool::SessionError;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<SessionError>()
                .map(SessionError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    // RUST_LOG wins over --log-level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(true)
        .init();

    let config = toml::load_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    info!("numpool v{} ({:?} mode)", env!("CARGO_PKG_VERSION"), cli.mode);
    for line in config.to_string().lines() {
        info!("{}", line);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    match cli.mode {
        ExecutionMode::Coordinator => runtime.block_on(run_coordinator(&cli, config)),
        ExecutionMode::Client => runtime.block_on(run_client(&cli, config)),
    }
}

/// Serve one client session
async fn run_coordinator(cli: &Cli, config: Config) -> Result<()> {
    let coordinator = Coordinator::new(Arc::new(config));
    let summary = coordinator.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for worker in &summary.workers {
        info!(
            worker = worker.id,
            "port={:?} sum={} count={} state={}",
            worker.port,
            worker.sum,
            worker.count,
            worker.state
        );
    }
    Ok(())
}

/// Drive one session against a coordinator and check its answers
async fn run_client(cli: &Cli, config: Config) -> Result<()> {
    let addr = SocketAddr::new(config.network.bind_address, config.network.discovery_port);
    let listener = DiscoveryListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind discovery socket on {}", addr))?;
    info!("Waiting for coordinator datagram on {}", addr);

    let plan = LoadPlan {
        workers: cli.workers,
        numbers_per_worker: cli.numbers_per_worker,
        seed: cli.seed,
    };
    let report = run_load(&listener, &plan, config.session.idle_timeout()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Worker ports:  {:?}", report.ports);
        println!("Sum:           {} (expected {})", report.reported_sum, report.expected_sum);
        println!("Count:         {} (expected {})", report.reported_count, report.expected_count);
        println!(
            "Max-sum worker: {} (expected {:?})",
            report.reported_max_worker, report.expected_max_worker
        );
        println!("Verified:      {}", report.verified);
    }

    if !report.verified {
        anyhow::bail!("coordinator answers do not match the streamed values");
    }
    Ok(())
}
