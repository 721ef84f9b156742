//! Atomic counters and rolling latency percentiles.
//!
//! Every counter is a relaxed atomic on the hot path; [`StatsAggregator::snapshot`]
//! is the only place that takes a lock, and it holds it only long enough to
//! copy the latency ring buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{self, Timestamp};
use crate::queue::QueueSet;

const LATENCY_RING_CAPACITY: usize = 4096;

/// Read-only copy of the aggregator's counters at one moment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub queue_depths: [usize; 4],
    pub total_queued: usize,
    pub queue_pressure: f64,

    pub active_workers: usize,
    pub idle_workers: usize,
    pub total_workers: usize,

    pub throughput_last_second: f64,

    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,

    pub failed: u64,
    pub retried: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub backpressure: u64,

    pub uptime: Duration,
    pub total_tasks_processed: u64,
}

/// Lock-free write path, lock-guarded read path.
pub(crate) struct StatsAggregator {
    queues: Arc<QueueSet>,
    total_capacity: usize,

    active_workers: AtomicUsize,
    total_workers: AtomicUsize,

    failed: AtomicU64,
    retried: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    completed: AtomicU64,
    backpressure: AtomicU64,

    started_at: Timestamp,
    recent_completions: Mutex<Vec<Timestamp>>,
    latencies_ms: Mutex<Vec<u64>>,
}

impl StatsAggregator {
    pub(crate) fn new(queues: Arc<QueueSet>, total_capacity: usize, total_workers: usize) -> Self {
        Self {
            queues,
            total_capacity: total_capacity.max(1),
            active_workers: AtomicUsize::new(0),
            total_workers: AtomicUsize::new(total_workers),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            started_at: clock::now(),
            recent_completions: Mutex::new(Vec::new()),
            latencies_ms: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn worker_started_task(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_idle(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, execution_time: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.push_latency(execution_time.as_millis() as u64);
        self.push_completion();
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// A delayed/retrying task found its destination queue full and was
    /// re-inserted into the delay heap with backoff instead of dispatched.
    pub(crate) fn record_backpressure(&self) {
        self.backpressure.fetch_add(1, Ordering::Relaxed);
    }

    fn push_latency(&self, ms: u64) {
        let mut ring = self.latencies_ms.lock();
        ring.push(ms);
        if ring.len() > LATENCY_RING_CAPACITY {
            let excess = ring.len() - LATENCY_RING_CAPACITY;
            ring.drain(0..excess);
        }
    }

    fn push_completion(&self) {
        let now = clock::now();
        let mut recent = self.recent_completions.lock();
        recent.push(now);
        let cutoff = now.checked_sub(Duration::from_secs(60));
        if let Some(cutoff) = cutoff {
            recent.retain(|t| *t >= cutoff);
        }
    }

    #[must_use]
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let queue_depths = self.queues.lengths();
        let total_queued: usize = queue_depths.iter().sum();

        let (p50, p95, p99) = {
            let mut ring = self.latencies_ms.lock().clone();
            percentiles(&mut ring)
        };

        let throughput_last_second = {
            let recent = self.recent_completions.lock();
            let now = clock::now();
            let one_sec_ago = now.checked_sub(Duration::from_secs(1));
            match one_sec_ago {
                Some(cutoff) => recent.iter().filter(|t| **t >= cutoff).count() as f64,
                None => 0.0,
            }
        };

        let active = self.active_workers.load(Ordering::Relaxed);
        let total = self.total_workers.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let timed_out = self.timed_out.load(Ordering::Relaxed);

        StatsSnapshot {
            queue_depths,
            total_queued,
            queue_pressure: total_queued as f64 / self.total_capacity as f64,
            active_workers: active,
            idle_workers: total.saturating_sub(active),
            total_workers: total,
            throughput_last_second,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            failed,
            retried: self.retried.load(Ordering::Relaxed),
            timed_out,
            cancelled,
            backpressure: self.backpressure.load(Ordering::Relaxed),
            uptime: clock::duration_since(self.started_at),
            total_tasks_processed: completed + failed + cancelled + timed_out,
        }
    }
}

fn percentiles(samples: &mut [u64]) -> (f64, f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    samples.sort_unstable();
    let at = |p: f64| -> f64 {
        let idx = ((samples.len() as f64 - 1.0) * p).round() as usize;
        samples[idx.min(samples.len() - 1)] as f64
    };
    (at(0.50), at(0.95), at(0.99))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_of_empty_ring_are_zero() {
        let mut empty: Vec<u64> = Vec::new();
        assert_eq!(percentiles(&mut empty), (0.0, 0.0, 0.0));
    }

    #[test]
    fn percentiles_monotonic() {
        let mut samples: Vec<u64> = (1..=100).collect();
        let (p50, p95, p99) = percentiles(&mut samples);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn queue_pressure_reflects_occupancy() {
        let queues = Arc::new(QueueSet::new([4; 4]));
        let agg = StatsAggregator::new(Arc::clone(&queues), 16, 2);
        let snapshot = agg.snapshot();
        assert_eq!(snapshot.total_queued, 0);
        assert_eq!(snapshot.queue_pressure, 0.0);
    }

    #[test]
    fn worker_active_count_tracks_start_and_idle() {
        let queues = Arc::new(QueueSet::new([4; 4]));
        let agg = StatsAggregator::new(queues, 16, 3);
        agg.worker_started_task();
        agg.worker_started_task();
        let snap = agg.snapshot();
        assert_eq!(snap.active_workers, 2);
        assert_eq!(snap.idle_workers, 1);
        agg.worker_idle();
        assert_eq!(agg.snapshot().active_workers, 1);
    }
}
