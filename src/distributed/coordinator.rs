//! Session coordinator
//!
//! This module implements the coordinator for one client session.
//! The coordinator:
//! - Performs the discovery rendezvous on the primary channel
//! - Reads the requested worker count
//! - Spawns workers and relays their ports to the client
//! - Answers queries while workers run
//! - Stops and drains every worker when the session ends

use crate::config::Config;
use crate::distributed::endpoint::Endpoint;
use crate::distributed::protocol::ControlMessage;
use crate::distributed::rendezvous;
use crate::distributed::session::Session;
use crate::error::SessionError;
use crate::worker::WorkerReport;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a session that got past startup ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEnd {
    /// Client sent `CLOSE_CONNECTION`
    ClientClosed,
    /// No query within the idle timeout
    IdleTimeout,
    /// The primary channel failed or the client disconnected
    TransportError,
}

/// Outcome of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Host the coordinator ran on
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end: SessionEnd,
    pub workers: Vec<WorkerReport>,
}

impl SessionSummary {
    pub fn total_sum(&self) -> i64 {
        self.workers.iter().map(|w| w.sum).sum()
    }

    pub fn total_count(&self) -> u64 {
        self.workers.iter().map(|w| w.count).sum()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Session coordinator
///
/// Serves exactly one client session per [`Coordinator::run`].
pub struct Coordinator {
    config: Arc<Config>,
}

impl Coordinator {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Run one session from rendezvous to shutdown
    ///
    /// Errors are returned only when the session never got as far as
    /// spawning workers: rendezvous failures, and a missing or invalid
    /// worker count. Once workers exist the session always ends with a
    /// graceful shutdown and a [`SessionSummary`].
    pub async fn run(self) -> Result<SessionSummary> {
        let mut primary = rendezvous::primary_rendezvous(&self.config).await?;

        let result = self.serve(&mut primary).await;
        primary.close().await;

        match &result {
            Ok(summary) => info!(
                "Session ended ({:?}) after {}ms: sum={} count={}",
                summary.end,
                summary.duration().num_milliseconds(),
                summary.total_sum(),
                summary.total_count()
            ),
            Err(e) => error!("Session aborted: {}", e),
        }
        result
    }

    async fn serve(&self, primary: &mut Endpoint) -> Result<SessionSummary> {
        let started_at = Utc::now();
        let worker_count = self.read_worker_count(primary).await?;

        let mut session = Session::new(self.config.clone());
        let ports = session.spawn_workers(worker_count).await;

        let end = match send_ports(primary, &ports, self.config.session.idle_timeout()).await {
            Ok(()) => self.query_loop(primary, &session).await,
            Err(e) => {
                warn!("Failed to send worker ports: {}", e);
                SessionEnd::TransportError
            }
        };

        session.shutdown().await;

        Ok(SessionSummary {
            node: node_id(),
            started_at,
            ended_at: Utc::now(),
            end,
            workers: session.reports(),
        })
    }

    /// Read and validate the first message of the session
    async fn read_worker_count(&self, primary: &mut Endpoint) -> Result<u32> {
        let limits = &self.config.session;
        let count = primary.read_message(limits.idle_timeout()).await.map_err(|e| {
            warn!("Failed to receive the worker count from client: {}", e);
            e
        })?;

        if !limits.accepts_worker_count(count) {
            error!(
                "Invalid number of workers received from client: {} (legal: {}-{})",
                count, limits.min_workers, limits.max_workers
            );
            return Err(SessionError::ProtocolViolation(format!(
                "worker count {} outside [{}, {}]",
                count, limits.min_workers, limits.max_workers
            )));
        }

        info!("Client requested {} workers", count);
        Ok(count as u32)
    }

    /// Serve queries until the client closes, idles out, or the channel fails
    async fn query_loop(&self, primary: &mut Endpoint, session: &Session) -> SessionEnd {
        let idle_timeout = self.config.session.idle_timeout();
        info!("Serving queries (idle timeout {:?})", idle_timeout);

        loop {
            let code = match primary.read_message(idle_timeout).await {
                Ok(code) => code,
                Err(SessionError::IdleTimeout(_)) => {
                    warn!("No query within {:?}, closing session", idle_timeout);
                    return SessionEnd::IdleTimeout;
                }
                Err(e) => {
                    warn!("Primary channel failed: {}", e);
                    return SessionEnd::TransportError;
                }
            };

            let reply = match ControlMessage::from_query_code(code) {
                Some(ControlMessage::CloseConnection) => {
                    info!("Client closed the session");
                    return SessionEnd::ClientClosed;
                }
                Some(query) => session.answer(query),
                None => {
                    warn!("Invalid query code {}", code);
                    ControlMessage::InvalidQuery.value()
                }
            };
            debug!("Query {} -> {}", code, reply);

            // A client that stops reading replies ends the session here
            if let Err(e) = primary.write_message(reply, idle_timeout).await {
                warn!("Failed to answer query: {}", e);
                return SessionEnd::TransportError;
            }
        }
    }
}

/// Hostname of this machine, or "unknown"
fn node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Relay worker ports to the client in spawn order
///
/// A worker without a port is reported as `CLIENT_TIMEOUT`.
async fn send_ports(
    primary: &mut Endpoint,
    ports: &[Option<u16>],
    timeout: Duration,
) -> Result<()> {
    for port in ports {
        let value = port
            .map(i32::from)
            .unwrap_or(ControlMessage::ClientTimeout.value());
        primary.write_message(value, timeout).await?;
    }
    Ok(())
}
