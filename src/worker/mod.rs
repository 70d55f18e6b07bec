//! Worker task implementation
//!
//! A [`Worker`] owns one [`Endpoint`] and writes to one [`Accumulator`]. It
//! binds a listener, reports the port through a one-shot channel, accepts
//! the client's stream and adds every received value to its accumulator
//! until the stream ends.
//!
//! # Architecture
//!
//! - **Worker**: runs as its own tokio task; the only writer of its accumulator
//! - **WorkerHandle**: kept by the coordinator; reads the accumulator and state,
//!   waits for the port, signals stop and joins the task
//! - **IdSequence**: hands out worker ids in spawn order
//!
//! Stopping is cooperative: the handle flips the `running` flag, which the
//! worker checks before each read and races against every blocking accept
//! or read.
//!
//! # Example
//!
//! ```no_run
//! use numpool::config::Config;
//! use numpool::worker::{IdSequence, Worker};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = Arc::new(Config::default());
//! let mut ids = IdSequence::new();
//!
//! let mut handle = Worker::spawn(ids.next_id(), config);
//! let port = handle.wait_for_port(Duration::from_secs(5)).await;
//! println!("Worker listening on {:?}", port);
//!
//! handle.close_worker();
//! handle.join(Duration::from_secs(5)).await;
//! # }
//! ```

pub mod state;

use crate::config::Config;
use crate::distributed::endpoint::Endpoint;
use crate::distributed::protocol::ControlMessage;
use crate::distributed::rendezvous;
use crate::error::SessionError;
use crate::stats::Accumulator;
use crate::Result;
use serde::Serialize;
use state::StateCell;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use state::WorkerState;

/// Worker identifier, unique within a session
pub type WorkerId = u32;

/// Hands out worker ids in spawn order, starting at 0
#[derive(Debug, Default)]
pub struct IdSequence {
    next: WorkerId,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> WorkerId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Why a worker's receive loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Client sent `TERMINATE_STREAM`
    StreamTerminated,
    /// Client closed the connection without a terminator
    PeerClosed,
    /// No message within the idle timeout
    IdleTimeout,
    /// Stopped by the coordinator
    Stopped,
}

/// Final view of one worker, reported at session end
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub port: Option<u16>,
    pub sum: i64,
    pub count: u64,
    #[serde(serialize_with = "serialize_state")]
    pub state: WorkerState,
}

fn serialize_state<S>(state: &WorkerState, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.collect_str(state)
}

/// Worker task state
pub struct Worker {
    id: WorkerId,
    config: Arc<Config>,
    endpoint: Endpoint,
    accumulator: Arc<Accumulator>,
    state: Arc<StateCell>,
    running: watch::Receiver<bool>,
}

impl Worker {
    /// Spawn a worker task and return the coordinator's handle to it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(id: WorkerId, config: Arc<Config>) -> WorkerHandle {
        let accumulator = Arc::new(Accumulator::new());
        let state = Arc::new(StateCell::new());
        let (running_tx, running_rx) = watch::channel(true);
        let (port_tx, port_rx) = oneshot::channel();

        let worker = Worker {
            id,
            config,
            endpoint: Endpoint::new(),
            accumulator: accumulator.clone(),
            state: state.clone(),
            running: running_rx,
        };
        debug!(worker = id, "Worker created, not yet bound");

        let task = tokio::spawn(worker.run(port_tx));

        WorkerHandle {
            id,
            accumulator,
            state,
            running: running_tx,
            port_rx: Some(port_rx),
            port: None,
            task: Some(task),
        }
    }

    /// Task body: serve the stream, then always release the endpoint
    async fn run(mut self, port_tx: oneshot::Sender<u16>) {
        match self.serve(port_tx).await {
            Ok(exit) => info!(
                worker = self.id,
                sum = self.accumulator.sum(),
                count = self.accumulator.count(),
                "Worker finished: {:?}", exit
            ),
            Err(e) => warn!(worker = self.id, "Worker failed: {}", e),
        }

        self.state.set(WorkerState::Draining);
        self.endpoint.close().await;
        self.state.set(WorkerState::Closed);
        debug!(worker = self.id, "Worker closed");
    }

    async fn serve(&mut self, port_tx: oneshot::Sender<u16>) -> Result<WorkerExit> {
        self.state.set(WorkerState::Binding);
        let port = rendezvous::bind_worker(&mut self.endpoint, &self.config.network).await?;
        self.state.set(WorkerState::Listening);
        info!(worker = self.id, port, "Worker listening");

        // Coordinator may have given up waiting; the worker still serves
        let _ = port_tx.send(port);

        let accept_timeout = self.config.session.worker_accept_timeout();
        let peer = tokio::select! {
            accepted = rendezvous::accept_worker(&mut self.endpoint, accept_timeout) => accepted?,
            _ = stopped(&mut self.running) => return Ok(WorkerExit::Stopped),
        };
        self.state.set(WorkerState::Connected);
        info!(worker = self.id, "Client {} connected", peer);

        self.receive_loop().await
    }

    /// Read values until the stream ends, the worker idles out, or it is stopped
    async fn receive_loop(&mut self) -> Result<WorkerExit> {
        let idle_timeout = self.config.session.idle_timeout();

        loop {
            if !*self.running.borrow() {
                return Ok(WorkerExit::Stopped);
            }

            let message = tokio::select! {
                message = self.endpoint.read_message(idle_timeout) => message,
                _ = stopped(&mut self.running) => return Ok(WorkerExit::Stopped),
            };

            match message {
                Ok(value) if ControlMessage::is_stream_terminator(value) => {
                    return Ok(WorkerExit::StreamTerminated);
                }
                Ok(value) => {
                    self.accumulator.record(value);
                    debug!(worker = self.id, "Received increment of {}", value);
                }
                Err(SessionError::IdleTimeout(_)) => return Ok(WorkerExit::IdleTimeout),
                Err(SessionError::Transport(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(WorkerExit::PeerClosed);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Resolves once `running` is false or the handle is gone
async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}

/// Coordinator-side handle to a spawned worker
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    accumulator: Arc<Accumulator>,
    state: Arc<StateCell>,
    running: watch::Sender<bool>,
    port_rx: Option<oneshot::Receiver<u16>>,
    port: Option<u16>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Shared read access to the worker's accumulator
    pub fn accumulator(&self) -> Arc<Accumulator> {
        self.accumulator.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Bound port, if [`WorkerHandle::wait_for_port`] has seen it
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Wait until the worker has bound its listener
    ///
    /// Returns `None` if binding failed or took longer than `timeout`.
    pub async fn wait_for_port(&mut self, timeout: Duration) -> Option<u16> {
        if let Some(rx) = self.port_rx.take() {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(port)) => self.port = Some(port),
                Ok(Err(_)) => warn!(worker = self.id, "Worker exited before binding"),
                Err(_) => warn!(worker = self.id, "Worker did not bind within {:?}", timeout),
            }
        }
        self.port
    }

    /// Ask the worker to stop
    pub fn close_worker(&self) {
        self.running.send_replace(false);
    }

    /// Wait for the worker task to finish
    ///
    /// Returns `false` if it did not finish within `timeout`; the task is
    /// then aborted, which drops its sockets.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(mut task) = self.task.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(worker = self.id, "Worker task failed: {}", e);
                false
            }
            Err(_) => {
                warn!(worker = self.id, "Worker did not stop within {:?}, aborting", timeout);
                task.abort();
                false
            }
        }
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            id: self.id,
            port: self.port,
            sum: self.accumulator.sum(),
            count: self.accumulator.count(),
            state: self.state(),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.close_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::write_message;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(min_port: u16) -> Arc<Config> {
        let mut config = Config::default();
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.network.min_port = min_port;
        config.session.idle_timeout_ms = 2000;
        Arc::new(config)
    }

    async fn connect(port: u16) -> TcpStream {
        TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap()
    }

    #[test]
    fn test_id_sequence() {
        let mut ids = IdSequence::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[tokio::test]
    async fn test_worker_accumulates_until_terminated() {
        let mut handle = Worker::spawn(0, test_config(30000));
        let port = handle.wait_for_port(WAIT).await.unwrap();

        let mut stream = connect(port).await;
        for value in [5, -2, 10] {
            write_message(&mut stream, value).await.unwrap();
        }
        write_message(&mut stream, ControlMessage::TerminateStream.value()).await.unwrap();

        // Worker closes its side after draining
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);

        assert!(handle.join(WAIT).await);
        assert_eq!(handle.state(), WorkerState::Closed);
        let acc = handle.accumulator();
        assert_eq!(acc.sum(), 13);
        assert_eq!(acc.count(), 3);
    }

    #[tokio::test]
    async fn test_close_while_listening() {
        let mut handle = Worker::spawn(1, test_config(30100));
        let port = handle.wait_for_port(WAIT).await;
        assert!(port.is_some());
        assert_eq!(handle.state(), WorkerState::Listening);

        handle.close_worker();
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), WorkerState::Closed);
        assert_eq!(handle.report().count, 0);
    }

    #[tokio::test]
    async fn test_close_while_connected() {
        let mut handle = Worker::spawn(2, test_config(30200));
        let port = handle.wait_for_port(WAIT).await.unwrap();
        let mut stream = connect(port).await;
        write_message(&mut stream, 7).await.unwrap();

        // Wait until the value has been applied
        let acc = handle.accumulator();
        let deadline = tokio::time::Instant::now() + WAIT;
        while acc.count() < 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.close_worker();
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), WorkerState::Closed);
        assert_eq!(acc.sum(), 7);
    }

    #[tokio::test]
    async fn test_peer_disconnect_keeps_partial_sum() {
        let mut handle = Worker::spawn(3, test_config(30300));
        let port = handle.wait_for_port(WAIT).await.unwrap();
        let mut stream = connect(port).await;
        write_message(&mut stream, 40).await.unwrap();
        write_message(&mut stream, 2).await.unwrap();
        drop(stream);

        assert!(handle.join(WAIT).await);
        let report = handle.report();
        assert_eq!(report.sum, 42);
        assert_eq!(report.count, 2);
        assert_eq!(report.state, WorkerState::Closed);
    }

    #[tokio::test]
    async fn test_idle_connected_worker_drains() {
        let mut config = (*test_config(30350)).clone();
        config.session.idle_timeout_ms = 200;
        config.session.worker_accept_timeout_ms = Some(5000);
        let mut handle = Worker::spawn(6, Arc::new(config));
        let port = handle.wait_for_port(WAIT).await.unwrap();

        // One value, then silence with the connection left open
        let mut stream = connect(port).await;
        write_message(&mut stream, 11).await.unwrap();

        assert!(handle.join(WAIT).await);
        let report = handle.report();
        assert_eq!(report.state, WorkerState::Closed);
        assert_eq!(report.sum, 11);
        assert_eq!(report.count, 1);

        // Worker closed its side
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_accept_timeout_closes_worker() {
        let mut config = (*test_config(30400)).clone();
        config.session.worker_accept_timeout_ms = Some(50);
        let mut handle = Worker::spawn(4, Arc::new(config));

        assert!(handle.wait_for_port(WAIT).await.is_some());
        assert!(handle.join(WAIT).await);
        assert_eq!(handle.state(), WorkerState::Closed);
    }

    #[tokio::test]
    async fn test_bind_failure_reports_no_port() {
        let mut config = (*test_config(30500)).clone();
        // Hold the only port in the range
        let mut holder = Endpoint::new();
        let taken = holder
            .bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 30500, 65535)
            .await
            .unwrap();
        config.network.min_port = taken;
        config.network.max_port = taken + 1;

        let mut handle = Worker::spawn(5, Arc::new(config));
        assert_eq!(handle.wait_for_port(WAIT).await, None);
        assert!(handle.join(WAIT).await);
        assert_eq!(handle.state(), WorkerState::Closed);
    }
}
