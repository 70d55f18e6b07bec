//! Per-worker statistics
//!
//! Each worker owns one [`Accumulator`] that it is the only writer of. The
//! coordinator reads all of them concurrently to answer queries.
//!
//! Counters are cache-line aligned so that workers running on different
//! cores do not invalidate each other's lines while updating.

pub mod aggregator;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Running sum and item count for one worker
///
/// Written by exactly one worker task, read by the coordinator. All
/// operations are single atomic instructions, so no lock is taken.
///
/// # Memory Layout
///
/// ```text
/// [sum: 8 bytes][count: 8 bytes][padding: 48 bytes] = 64 bytes total
/// ```
#[repr(align(64))]
#[derive(Debug)]
pub struct Accumulator {
    sum: AtomicI64,
    count: AtomicU64,
    _padding: [u8; 48],
}

impl Accumulator {
    /// Create an accumulator with sum and count at zero
    pub fn new() -> Self {
        Self {
            sum: AtomicI64::new(0),
            count: AtomicU64::new(0),
            _padding: [0; 48],
        }
    }

    /// Add `delta` to the running sum
    ///
    /// `Ordering::Relaxed` is enough: readers only need each counter to be
    /// eventually consistent, not ordered against the other one.
    #[inline]
    pub fn add_sum(&self, delta: i64) {
        self.sum.fetch_add(delta, Ordering::Relaxed);
    }

    /// Count one more data item
    #[inline]
    pub fn increment_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one data item: sum first, then count
    #[inline]
    pub fn record(&self, value: i32) {
        self.add_sum(value as i64);
        self.increment_count();
    }

    #[inline]
    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_accumulator_size() {
        assert_eq!(std::mem::size_of::<Accumulator>(), 64);
        assert_eq!(std::mem::align_of::<Accumulator>(), 64);
    }

    #[test]
    fn test_accumulator_operations() {
        let acc = Accumulator::new();
        assert_eq!(acc.sum(), 0);
        assert_eq!(acc.count(), 0);

        acc.record(5);
        acc.record(-2);
        acc.record(10);

        assert_eq!(acc.sum(), 13);
        assert_eq!(acc.count(), 3);
    }

    #[test]
    fn test_sum_exceeds_i32() {
        let acc = Accumulator::new();
        acc.record(i32::MAX);
        acc.record(i32::MAX);
        assert_eq!(acc.sum(), 2 * i32::MAX as i64);
    }

    #[test]
    fn test_single_writer_concurrent_reader() {
        let acc = Arc::new(Accumulator::new());
        let writer = {
            let acc = acc.clone();
            std::thread::spawn(move || {
                for i in 1..=10_000 {
                    acc.record(i);
                }
            })
        };

        // Counts seen by the reader never go backwards
        let mut last = 0;
        while !writer.is_finished() {
            let seen = acc.count();
            assert!(seen >= last);
            last = seen;
        }
        writer.join().unwrap();

        assert_eq!(acc.count(), 10_000);
        assert_eq!(acc.sum(), 10_000 * 10_001 / 2);
    }
}
