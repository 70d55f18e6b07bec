//! One client session's workers
//!
//! The [`Session`] owns the id sequence, every [`WorkerHandle`] and the
//! aggregator over their accumulators. Workers are only added during
//! spawn, before any query is served, so queries iterate a fixed set.

use crate::config::Config;
use crate::distributed::protocol::{saturate_i64, saturate_u64, ControlMessage};
use crate::stats::aggregator::StatisticsAggregator;
use crate::worker::{IdSequence, Worker, WorkerHandle, WorkerReport};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Workers and statistics of one client session
pub struct Session {
    config: Arc<Config>,
    ids: IdSequence,
    workers: Vec<WorkerHandle>,
    aggregator: StatisticsAggregator,
}

impl Session {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            ids: IdSequence::new(),
            workers: Vec::new(),
            aggregator: StatisticsAggregator::new(),
        }
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn aggregator(&self) -> &StatisticsAggregator {
        &self.aggregator
    }

    /// Spawn `count` workers and wait until each has bound its port
    ///
    /// All workers are started before any port is awaited, so binding runs
    /// concurrently. Each wait is bounded by `session.worker_bind_timeout_ms`.
    /// Returns the ports in spawn order; a worker that failed to bind, or
    /// did not bind in time, contributes `None`.
    pub async fn spawn_workers(&mut self, count: u32) -> Vec<Option<u16>> {
        info!("Spawning {} workers", count);

        let first = self.workers.len();
        for _ in 0..count {
            let id = self.ids.next_id();
            let handle = Worker::spawn(id, self.config.clone());
            self.aggregator.add_worker(id, handle.accumulator());
            self.workers.push(handle);
        }

        let bind_timeout = self.config.session.worker_bind_timeout();
        let mut ports = Vec::with_capacity(count as usize);
        for handle in &mut self.workers[first..] {
            let port = handle.wait_for_port(bind_timeout).await;
            debug!(worker = handle.id(), "Worker port: {:?}", port);
            ports.push(port);
        }
        ports
    }

    /// Answer one query from the client
    ///
    /// `CloseConnection` has no answer and is handled by the caller; it is
    /// answered with `INVALID_QUERY` if it reaches here.
    pub fn answer(&self, query: ControlMessage) -> i32 {
        match query {
            ControlMessage::QuerySumComplete => saturate_i64(self.aggregator.total_sum()),
            ControlMessage::QueryNumberCount => saturate_u64(self.aggregator.total_count()),
            ControlMessage::QueryMaxSumWorker => self
                .aggregator
                .max_sum_worker()
                .and_then(|id| i32::try_from(id).ok())
                .unwrap_or(ControlMessage::InvalidQuery.value()),
            _ => ControlMessage::InvalidQuery.value(),
        }
    }

    /// Stop every worker and wait for each to close
    ///
    /// All workers are signalled first so they drain in parallel; each join
    /// is bounded by the configured shutdown timeout.
    pub async fn shutdown(&mut self) {
        info!("Stopping {} workers", self.workers.len());
        for handle in &self.workers {
            handle.close_worker();
        }

        let timeout = self.config.session.shutdown_timeout();
        let mut stuck = 0;
        for handle in &mut self.workers {
            if !handle.join(timeout).await {
                stuck += 1;
            }
        }

        if stuck > 0 {
            warn!("{} workers did not close cleanly", stuck);
        } else {
            info!("All workers closed");
        }
    }

    pub fn reports(&self) -> Vec<WorkerReport> {
        self.workers.iter().map(WorkerHandle::report).collect()
    }
}
