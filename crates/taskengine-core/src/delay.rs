//! Delay and retry scheduling.
//!
//! Tasks submitted with a delay, and tasks re-entering the system after a
//! retryable failure, do not go straight to a priority queue — they wait
//! in a min-heap keyed by eligibility time. A dedicated background thread
//! pops entries as they become eligible and hands them to the
//! [`crate::queue::QueueSet`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::{self, Timestamp};
use crate::queue::QueueSet;
use crate::stats::StatsAggregator;
use crate::task::Descriptor;

/// Base backoff applied the first time a delayed/retry dispatch finds its
/// destination queue full.
const REQUEUE_BASE_BACKOFF_MS: u64 = 5;
/// Cap on the doubling backoff applied to repeated re-insertions (§4.4).
const REQUEUE_MAX_BACKOFF_MS: u64 = 100;

struct DelayedEntry {
    eligible_at: Timestamp,
    seq: u64,
    descriptor: Descriptor,
    requeue_attempts: u32,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.eligible_at == other.eligible_at && self.seq == other.seq
    }
}
impl Eq for DelayedEntry {}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so `BinaryHeap` (a max-heap) behaves as a min-heap on
        // `(eligible_at, seq)`.
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<DelayedEntry>>,
    condvar: Condvar,
    seq: AtomicU64,
    shutdown: AtomicBool,
}

/// Owns the delay heap and the background thread that drains it into the
/// dispatch queues.
///
/// `shutdown` takes `&self` (not `&mut self`) so the scheduler can be
/// shared behind an `Arc` with the workers that call `insert` on the
/// retry path, while the engine facade still holds the one reference that
/// calls `shutdown`.
pub(crate) struct DelayScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DelayScheduler {
    pub(crate) fn start(queues: Arc<QueueSet>, stats: Arc<StatsAggregator>, idle_wait: Duration) -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("taskengine-delay".into())
            .spawn(move || Self::run(worker_shared, queues, stats, idle_wait))
            .expect("failed to spawn delay scheduler thread");

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Inserts `descriptor`, eligible for dispatch once `delay` elapses.
    pub(crate) fn insert(&self, descriptor: Descriptor, delay: Duration) {
        let entry = DelayedEntry {
            eligible_at: clock::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            descriptor,
            requeue_attempts: 0,
        };
        self.shared.heap.lock().push(entry);
        self.shared.condvar.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.condvar.notify_one();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(shared: Arc<Shared>, queues: Arc<QueueSet>, stats: Arc<StatsAggregator>, idle_wait: Duration) {
        loop {
            let mut heap = shared.heap.lock();
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }

            match heap.peek() {
                None => {
                    // Nothing scheduled: wait until something is inserted
                    // or we're told to shut down. A periodic wake keeps
                    // shutdown latency bounded without a dedicated signal.
                    let _ = shared.condvar.wait_for(&mut heap, idle_wait);
                }
                Some(top) => {
                    let remaining = top.eligible_at.saturating_duration_since(clock::now());
                    if remaining.is_zero() {
                        let entry = heap.pop().expect("peeked entry must be present");
                        match queues.try_push(entry.descriptor) {
                            Ok(()) => {}
                            Err(queue_full) => {
                                let attempts = entry.requeue_attempts + 1;
                                let backoff_ms = REQUEUE_BASE_BACKOFF_MS
                                    .saturating_mul(1u64 << attempts.min(32))
                                    .min(REQUEUE_MAX_BACKOFF_MS);
                                let requeued = DelayedEntry {
                                    eligible_at: clock::now() + Duration::from_millis(backoff_ms),
                                    seq: shared.seq.fetch_add(1, Ordering::Relaxed),
                                    descriptor: queue_full.0,
                                    requeue_attempts: attempts,
                                };
                                tracing::warn!(
                                    attempts,
                                    backoff_ms,
                                    "destination queue full; re-inserting delayed task with backoff"
                                );
                                stats.record_backpressure();
                                heap.push(requeued);
                                shared.condvar.notify_one();
                            }
                        }
                        drop(heap);
                        continue;
                    }
                    let _ = shared.condvar.wait_for(&mut heap, remaining);
                }
            }
        }
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        DelayScheduler::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, ResultCell, TaskId};

    fn descriptor(id: u64) -> Descriptor {
        Descriptor {
            id: TaskId::from_raw(id),
            priority: Priority::Normal,
            body: Box::new(|_| Ok(Arc::new(()))),
            max_retries: 0,
            timeout: None,
            cell: ResultCell::new(TaskId::from_raw(id), Priority::Normal),
        }
    }

    fn test_stats(queues: &Arc<QueueSet>) -> Arc<StatsAggregator> {
        Arc::new(StatsAggregator::new(Arc::clone(queues), 8, 0))
    }

    #[test]
    fn delayed_task_becomes_eligible_and_is_enqueued() {
        let queues = Arc::new(QueueSet::new([8; 4]));
        let stats = test_stats(&queues);
        let scheduler = DelayScheduler::start(Arc::clone(&queues), stats, Duration::from_millis(50));
        scheduler.insert(descriptor(1), Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(200));
        assert!(queues.try_pop_highest().is_some());
        scheduler.shutdown();
    }

    #[test]
    fn not_eligible_before_delay_elapses() {
        let queues = Arc::new(QueueSet::new([8; 4]));
        let stats = test_stats(&queues);
        let scheduler = DelayScheduler::start(Arc::clone(&queues), stats, Duration::from_millis(50));
        scheduler.insert(descriptor(1), Duration::from_secs(30));

        std::thread::sleep(Duration::from_millis(50));
        assert!(queues.try_pop_highest().is_none());
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_joins_the_worker_thread() {
        let queues = Arc::new(QueueSet::new([8; 4]));
        let stats = test_stats(&queues);
        let scheduler = DelayScheduler::start(queues, stats, Duration::from_millis(50));
        scheduler.shutdown();
        assert!(scheduler.worker.lock().is_none());
    }

    #[test]
    fn full_destination_queue_requeues_with_backoff_instead_of_dropping() {
        let queues = Arc::new(QueueSet::new([1; 4]));
        // Fill the Normal queue so the first dispatch attempt fails.
        queues.try_push(descriptor(0)).unwrap();
        let stats = test_stats(&queues);
        let scheduler = DelayScheduler::start(Arc::clone(&queues), Arc::clone(&stats), Duration::from_millis(20));
        scheduler.insert(descriptor(1), Duration::from_millis(5));

        // Drain the blocking entry so the requeued task has room to land.
        std::thread::sleep(Duration::from_millis(30));
        assert!(queues.try_pop_highest().is_some());
        std::thread::sleep(Duration::from_millis(150));
        assert!(queues.try_pop_highest().is_some());
        assert!(stats.snapshot().backpressure >= 1);
        scheduler.shutdown();
    }
}
