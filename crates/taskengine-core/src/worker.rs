//! Worker pool.
//!
//! Fixed set of OS threads, each running the dispatch loop from §4.5: scan
//! priority classes in strict order, execute the callable, honor timeouts
//! and retries, and report the outcome to stats and the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::Select;

use crate::clock;
use crate::delay::DelayScheduler;
use crate::error::TaskError;
use crate::events::{Event, EventBus};
use crate::queue::QueueSet;
use crate::stats::StatsAggregator;
use crate::task::{Descriptor, TaskStatus};

/// Retry backoff parameters a worker needs to compute the next eligible
/// time on a retryable failure.
#[derive(Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    fn backoff(&self, retry_count: u32) -> Duration {
        let computed = self
            .base_backoff_ms
            .saturating_mul(1u64 << retry_count.min(32));
        Duration::from_millis(computed.min(self.max_backoff_ms))
    }
}

struct WorkerContext {
    id: usize,
    queues: Arc<QueueSet>,
    delay: Arc<DelayScheduler>,
    stats: Arc<StatsAggregator>,
    events: EventBus,
    retry_policy: RetryPolicy,
    shutdown: Arc<AtomicBool>,
}

/// Owns the worker threads. Created and torn down by
/// [`crate::engine::Engine`].
pub(crate) struct WorkerPool {
    handles: Vec<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub(crate) fn start(
        count: usize,
        queues: Arc<QueueSet>,
        delay: Arc<DelayScheduler>,
        stats: Arc<StatsAggregator>,
        events: EventBus,
        retry_policy: RetryPolicy,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let ctx = WorkerContext {
                id,
                queues: Arc::clone(&queues),
                delay: Arc::clone(&delay),
                stats: Arc::clone(&stats),
                events: events.clone(),
                retry_policy,
                shutdown: Arc::clone(&shutdown),
            };
            let handle = std::thread::Builder::new()
                .name(format!("taskengine-worker-{id}"))
                .spawn(move || run_worker(ctx))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        Self { handles, shutdown }
    }

    /// Signals every worker to exit after its current task (if any) and
    /// blocks until all worker threads have joined.
    pub(crate) fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Signals every worker to exit but does not join: a worker blocked in
    /// a callable that ignores cooperative cancellation keeps running
    /// detached and exits whenever it next observes the shutdown flag.
    pub(crate) fn shutdown_detached(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.handles.clear();
    }

    #[must_use]
    pub(crate) fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(ctx: WorkerContext) {
    tracing::debug!(worker_id = ctx.id, "worker started");
    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            tracing::debug!(worker_id = ctx.id, "worker stopped");
            return;
        }

        let descriptor = match next_descriptor(&ctx) {
            Some(d) => d,
            None => continue,
        };

        execute(&ctx, descriptor);
    }
}

/// Strict priority pop with a short, shutdown-responsive idle wait (§4.5
/// step 2). `Select::ready_timeout` blocks on all four receivers at once
/// rather than spin-polling them.
fn next_descriptor(ctx: &WorkerContext) -> Option<Descriptor> {
    if let Some(d) = ctx.queues.try_pop_highest() {
        return Some(d);
    }

    let receivers = ctx.queues.receivers();
    let mut select = Select::new();
    for r in receivers {
        select.recv(r);
    }
    let _ = select.ready_timeout(Duration::from_millis(1));

    ctx.queues.try_pop_highest()
}

fn execute(ctx: &WorkerContext, descriptor: Descriptor) {
    let Descriptor {
        id,
        priority,
        body,
        max_retries,
        timeout,
        cell,
    } = descriptor;

    // §4.5 step 3: a task cancelled while still queued never runs.
    if cell.is_ready() {
        if cell.status() == TaskStatus::Cancelled {
            ctx.stats.record_cancelled();
        }
        return;
    }

    if cell.transition_to_running(ctx.id).is_err() {
        return;
    }
    ctx.stats.worker_started_task();
    tracing::debug!(task_id = id.as_u64(), worker_id = ctx.id, "task started");
    ctx.events.publish(Event::TaskStarted {
        task_id: id,
        at: clock::now(),
    });

    let started_at = clock::now();
    let cancel_token = cell.cancel_token().clone();

    let watchdog = timeout.map(|limit| {
        let watchdog_cell = Arc::clone(&cell);
        let watchdog_stats = Arc::clone(&ctx.stats);
        let watchdog_events = ctx.events.clone();
        std::thread::spawn(move || {
            std::thread::sleep(limit);
            if watchdog_cell.status() == TaskStatus::Running {
                let elapsed_ms = clock::duration_since(started_at).as_millis() as u64;
                watchdog_cell.fail(TaskError::Timeout {
                    elapsed_ms,
                    limit_ms: limit.as_millis() as u64,
                });
                watchdog_stats.record_timed_out();
                tracing::warn!(task_id = id.as_u64(), elapsed_ms, "task timed out");
                watchdog_events.publish(Event::TaskCompleted {
                    task_id: id,
                    status: "timeout",
                    at: clock::now(),
                });
            }
        })
    });

    let outcome = body(&cancel_token);
    ctx.stats.worker_idle();
    // Detach rather than join: the callable already returned, and a
    // pending watchdog only ever performs a no-op `fail` once the cell is
    // terminal, so there is nothing left for it to race against here.
    drop(watchdog);

    // The watchdog or a cooperative cancellation may have already
    // finalized the cell while the callable was still returning control;
    // the callable's own outcome is then discarded (the watchdog already
    // reported it to stats/events above).
    if cell.status() != TaskStatus::Running {
        return;
    }

    match outcome {
        Ok(_) if cancel_token.is_cancelled() => {
            cell.finish_cancelled();
            ctx.stats.record_cancelled();
            tracing::debug!(task_id = id.as_u64(), "cancellation observed");
            ctx.events.publish(Event::TaskCancelled {
                task_id: id,
                at: clock::now(),
            });
        }
        Ok(value) => {
            let execution_time = clock::duration_since(started_at);
            cell.complete(value);
            ctx.stats.record_completed(execution_time);
            tracing::debug!(task_id = id.as_u64(), "task completed");
            ctx.events.publish(Event::TaskCompleted {
                task_id: id,
                status: "completed",
                at: clock::now(),
            });
        }
        Err(error) => {
            let is_timeout = matches!(error, TaskError::Timeout { .. });
            if !is_timeout {
                if let Ok(retry_count) = cell.schedule_retry(max_retries) {
                    ctx.stats.record_retried();
                    tracing::debug!(task_id = id.as_u64(), retry_count, "retry scheduled");
                    ctx.events.publish(Event::TaskRetryScheduled {
                        task_id: id,
                        retry_count,
                        at: clock::now(),
                    });
                    let backoff = ctx.retry_policy.backoff(retry_count - 1);
                    let redescriptor = Descriptor {
                        id,
                        priority,
                        body,
                        max_retries,
                        timeout,
                        cell: Arc::clone(&cell),
                    };
                    ctx.delay.insert(redescriptor, backoff);
                    return;
                }
            }
            cell.fail(error);
            if is_timeout {
                ctx.stats.record_timed_out();
                tracing::warn!(task_id = id.as_u64(), "task timed out");
                ctx.events.publish(Event::TaskCompleted {
                    task_id: id,
                    status: "timeout",
                    at: clock::now(),
                });
            } else {
                ctx.stats.record_failed();
                tracing::debug!(task_id = id.as_u64(), "task failed");
                ctx.events.publish(Event::TaskCompleted {
                    task_id: id,
                    status: "failed",
                    at: clock::now(),
                });
            }
        }
    }
}
