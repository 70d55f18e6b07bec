//! Statistics aggregation
//!
//! Answers the coordinator's queries by reading every worker's
//! [`Accumulator`]. Workers keep writing while queries run, so every
//! answer is a point-in-time snapshot that may miss in-flight updates.
//!
//! # Example
//!
//! ```
//! use numpool::stats::{Accumulator, aggregator::StatisticsAggregator};
//! use std::sync::Arc;
//!
//! let first = Arc::new(Accumulator::new());
//! first.record(5);
//! let second = Arc::new(Accumulator::new());
//! second.record(100);
//!
//! let mut aggregator = StatisticsAggregator::new();
//! aggregator.add_worker(0, first);
//! aggregator.add_worker(1, second);
//!
//! assert_eq!(aggregator.total_sum(), 105);
//! assert_eq!(aggregator.total_count(), 2);
//! assert_eq!(aggregator.max_sum_worker(), Some(1));
//! ```

use crate::stats::Accumulator;
use crate::worker::WorkerId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view over the accumulators of one session's workers
///
/// Populated while workers are spawned and only read afterwards. Iteration
/// is in ascending worker id order, which is also spawn order.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    workers: BTreeMap<WorkerId, Arc<Accumulator>>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker's accumulator
    pub fn add_worker(&mut self, worker_id: WorkerId, accumulator: Arc<Accumulator>) {
        self.workers.insert(worker_id, accumulator);
    }

    /// Worker ids in ascending order
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Sum over all workers
    pub fn total_sum(&self) -> i64 {
        self.workers.values().map(|acc| acc.sum()).sum()
    }

    /// Item count over all workers
    pub fn total_count(&self) -> u64 {
        self.workers.values().map(|acc| acc.count()).sum()
    }

    /// Id of the worker with the largest sum
    ///
    /// Ties go to the lowest id: a later worker only wins with a strictly
    /// larger sum. `None` when no workers are registered.
    pub fn max_sum_worker(&self) -> Option<WorkerId> {
        let mut best: Option<(WorkerId, i64)> = None;
        for (&id, acc) in &self.workers {
            let sum = acc.sum();
            match best {
                Some((_, best_sum)) if sum <= best_sum => {}
                _ => best = Some((id, sum)),
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator(values: &[i32]) -> Arc<Accumulator> {
        let acc = Arc::new(Accumulator::new());
        for &v in values {
            acc.record(v);
        }
        acc
    }

    #[test]
    fn test_empty_aggregator() {
        let aggregator = StatisticsAggregator::new();
        assert!(aggregator.worker_ids().is_empty());
        assert_eq!(aggregator.total_sum(), 0);
        assert_eq!(aggregator.total_count(), 0);
        assert_eq!(aggregator.max_sum_worker(), None);
    }

    #[test]
    fn test_totals() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_worker(0, accumulator(&[5, -2, 10]));
        aggregator.add_worker(1, accumulator(&[100]));
        aggregator.add_worker(2, accumulator(&[]));

        assert_eq!(aggregator.total_sum(), 113);
        assert_eq!(aggregator.total_count(), 4);
        assert_eq!(aggregator.max_sum_worker(), Some(1));
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_worker(3, accumulator(&[7]));
        aggregator.add_worker(1, accumulator(&[3, 4]));
        aggregator.add_worker(2, accumulator(&[7]));

        assert_eq!(aggregator.max_sum_worker(), Some(1));
    }

    #[test]
    fn test_all_negative() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_worker(0, accumulator(&[-10]));
        aggregator.add_worker(1, accumulator(&[-3]));

        assert_eq!(aggregator.max_sum_worker(), Some(1));
    }

    #[test]
    fn test_worker_ids_sorted() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_worker(2, accumulator(&[]));
        aggregator.add_worker(0, accumulator(&[]));
        aggregator.add_worker(1, accumulator(&[]));

        assert_eq!(aggregator.worker_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reads_live_values() {
        let live = accumulator(&[1]);
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_worker(0, live.clone());
        assert_eq!(aggregator.total_sum(), 1);

        live.record(41);
        assert_eq!(aggregator.total_sum(), 42);
        assert_eq!(aggregator.total_count(), 2);
    }
}
