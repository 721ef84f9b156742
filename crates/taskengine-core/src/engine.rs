//! Engine Facade: lifecycle, submission, cancellation, lookup, stats, shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::delay::DelayScheduler;
use crate::error::{EngineError, Result, TaskError};
use crate::events::{Event, EventBus};
use crate::future::FutureHandle;
use crate::queue::QueueSet;
use crate::registry::Registry;
use crate::stats::StatsSnapshot;
use crate::task::{
    CancellationToken, Descriptor, Priority, ResultCell, TaskBody, TaskId, TaskIdGenerator,
    TaskOutput,
};
use crate::worker::{RetryPolicy, WorkerPool};
use crate::stats::StatsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EngineState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EngineState::Created,
            1 => EngineState::Running,
            2 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }
}

/// Default submission parameters, mirroring `submit(...)`'s named
/// parameters in §4.8.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub priority: Priority,
    pub delay: Duration,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            delay: Duration::ZERO,
            max_retries: 0,
            timeout: None,
        }
    }
}

/// The Background Task Engine. Owns the registry, queues, delay
/// scheduler, and worker pool; independent instances in one process share
/// no mutable state.
pub struct Engine {
    config: EngineConfig,
    state: AtomicU8,
    id_gen: TaskIdGenerator,
    queues: Arc<QueueSet>,
    registry: Registry,
    delay: Arc<DelayScheduler>,
    stats: Arc<StatsAggregator>,
    events: EventBus,
    workers: parking_lot::Mutex<Option<WorkerPool>>,
}

impl Engine {
    /// Constructs an engine in the `Created` state. Call `start()` to
    /// spawn its worker pool.
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let mut config = config;
        let min_workers = config.min_workers;
        let max_workers = config.max_workers.max(min_workers);
        if config.workers < min_workers || config.workers > max_workers {
            let clamped = config.workers.clamp(min_workers, max_workers);
            tracing::warn!(
                requested = config.workers,
                clamped,
                min_workers,
                max_workers,
                "worker count outside configured bounds; clamping"
            );
            config.workers = clamped;
        }

        let capacities = config.queue_capacities();
        let total_capacity: usize = capacities.iter().sum();
        let queues = Arc::new(QueueSet::new(capacities));
        let stats = Arc::new(StatsAggregator::new(
            Arc::clone(&queues),
            total_capacity,
            config.workers,
        ));
        let delay = Arc::new(DelayScheduler::start(
            Arc::clone(&queues),
            Arc::clone(&stats),
            config.scheduler_tick(),
        ));
        let retention_terminal_max = config.retention_terminal_max;

        tracing::debug!(workers = config.workers, total_capacity, "engine constructed");

        Arc::new(Self {
            config,
            state: AtomicU8::new(EngineState::Created as u8),
            id_gen: TaskIdGenerator::default(),
            queues,
            registry: Registry::new(retention_terminal_max),
            delay,
            stats,
            events: EventBus::new(),
            workers: parking_lot::Mutex::new(None),
        })
    }

    #[must_use]
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Idempotent: calling `start()` on an already-`Running` engine is a
    /// no-op. Fails with `IllegalState` if the engine is `Stopping` or
    /// already `Stopped`.
    pub fn start(&self) -> Result<()> {
        match self.state() {
            EngineState::Running => return Ok(()),
            EngineState::Created => {}
            EngineState::Stopping | EngineState::Stopped => {
                return Err(EngineError::IllegalState {
                    reason: "engine cannot be restarted once stopping/stopped".into(),
                });
            }
        }

        let retry_policy = RetryPolicy {
            base_backoff_ms: self.config.retry_base_backoff_ms,
            max_backoff_ms: self.config.retry_max_backoff_ms,
        };
        let pool = WorkerPool::start(
            self.config.workers,
            Arc::clone(&self.queues),
            Arc::clone(&self.delay),
            Arc::clone(&self.stats),
            self.events.clone(),
            retry_policy,
        );
        *self.workers.lock() = Some(pool);
        self.state.store(EngineState::Running as u8, Ordering::Release);
        tracing::info!(workers = self.config.workers, "engine started");
        self.events.publish(Event::EngineStarted {
            at: crate::clock::now(),
        });
        Ok(())
    }

    /// Registers a typed task and dispatches it per `options`.
    pub fn submit<F, T>(
        self: &Arc<Self>,
        callable: F,
        options: SubmitOptions,
    ) -> Result<FutureHandle<T>>
    where
        F: Fn(&CancellationToken) -> std::result::Result<T, TaskError> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        if self.state() != EngineState::Running {
            return Err(EngineError::EngineStopped);
        }

        let timeout = options.timeout.or_else(|| self.config.default_timeout());
        let body: TaskBody = Box::new(move |token| {
            callable(token).map(|v| Arc::new(v) as TaskOutput)
        });

        let (task_id, cell) = self.enqueue(body, options.priority, options.delay, options.max_retries, timeout)?;
        Ok(FutureHandle::new(task_id, cell, Some(Arc::clone(self))))
    }

    /// Internal helper shared by `submit` and `then`: allocates a
    /// `TaskId` + Result Cell, registers it, and dispatches `body`
    /// straight to its priority queue or, if `delay > 0`, to the delay
    /// scheduler.
    fn enqueue(
        &self,
        body: TaskBody,
        priority: Priority,
        delay: Duration,
        max_retries: u32,
        timeout: Option<Duration>,
    ) -> Result<(TaskId, Arc<ResultCell>)> {
        let task_id = self.id_gen.next();
        let cell = ResultCell::new(task_id, priority);

        if delay.is_zero() {
            let descriptor = Descriptor {
                id: task_id,
                priority,
                body,
                max_retries,
                timeout,
                cell: Arc::clone(&cell),
            };
            self.queues.try_push(descriptor).map_err(|_| EngineError::QueueFull { priority })?;
        } else {
            let descriptor = Descriptor {
                id: task_id,
                priority,
                body,
                max_retries,
                timeout,
                cell: Arc::clone(&cell),
            };
            self.delay.insert(descriptor, delay);
        }

        self.registry.insert(task_id, Arc::clone(&cell));
        tracing::debug!(task_id = task_id.as_u64(), ?priority, "task submitted");
        self.events.publish(Event::TaskSubmitted {
            task_id,
            at: crate::clock::now(),
        });
        Ok((task_id, cell))
    }

    /// Internal: submits a task whose success payload is already
    /// type-erased, dispatching through the same priority-queue/delay
    /// path as `submit`. Used by [`crate::future::FutureHandle::then`] so
    /// chained transforms run on the worker pool like any other task.
    pub(crate) fn submit_erased(
        &self,
        body: TaskBody,
        priority: Priority,
    ) -> Result<Arc<ResultCell>> {
        if self.state() != EngineState::Running {
            return Err(EngineError::EngineStopped);
        }
        let (_, cell) = self.enqueue(body, priority, Duration::ZERO, 0, self.config.default_timeout())?;
        Ok(cell)
    }

    /// Looks up a previously submitted task by id.
    pub fn lookup<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        task_id: TaskId,
    ) -> Result<FutureHandle<T>> {
        self.registry
            .lookup(task_id)
            .map(|cell| FutureHandle::new(task_id, cell, Some(Arc::clone(self))))
            .ok_or(EngineError::TaskNotFound { task_id })
    }

    /// `true` if cancellation was effective (or the task was already
    /// cancelled); `false` if it had already completed or failed.
    pub fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let cell = self
            .registry
            .lookup(task_id)
            .ok_or(EngineError::TaskNotFound { task_id })?;
        let cancelled = cell.cancel();
        tracing::debug!(task_id = task_id.as_u64(), cancelled, "cancellation requested");
        Ok(cancelled)
    }

    /// A consistent read-only copy of the stats aggregator.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Explicitly releases a task's entry from the registry ahead of the
    /// retention-bound eviction, once the caller no longer needs to look
    /// it up (§3's caller-driven release path).
    pub fn release(&self, task_id: TaskId) -> Result<()> {
        self.registry
            .lookup(task_id)
            .ok_or(EngineError::TaskNotFound { task_id })?;
        self.registry.remove(task_id);
        tracing::debug!(task_id = task_id.as_u64(), "task entry released");
        Ok(())
    }

    /// Stops the engine. If `wait_for_completion`, blocks (up to
    /// `timeout`) for queued and running tasks to finish before
    /// cancelling whatever remains; otherwise cancels immediately.
    pub fn stop(&self, wait_for_completion: bool, timeout: Option<Duration>) -> Result<()> {
        match self.state() {
            EngineState::Stopped => return Ok(()),
            EngineState::Stopping => {
                return Err(EngineError::IllegalState {
                    reason: "stop already in progress".into(),
                });
            }
            EngineState::Created => {
                self.state.store(EngineState::Stopped as u8, Ordering::Release);
                return Ok(());
            }
            EngineState::Running => {}
        }

        self.state.store(EngineState::Stopping as u8, Ordering::Release);
        tracing::info!(wait_for_completion, "engine stopping");
        self.events.publish(Event::EngineStopping {
            at: crate::clock::now(),
        });

        // Only a wait-for-completion stop that actually observes the
        // registry drained before any deadline counts as "drained" — that
        // is the only case where every worker is guaranteed idle and a
        // blocking join on `pool.shutdown()` cannot hang.
        let mut drained = false;
        if wait_for_completion {
            let deadline = timeout.map(|t| crate::clock::now() + t);
            loop {
                let outstanding = self
                    .registry
                    .all_cells()
                    .into_iter()
                    .filter(|c| !c.is_ready())
                    .count();
                if outstanding == 0 {
                    drained = true;
                    break;
                }
                if let Some(deadline) = deadline {
                    if crate::clock::now() >= deadline {
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        for cell in self.registry.all_cells() {
            if !cell.is_ready() {
                cell.cancel();
            }
        }

        if let Some(mut pool) = self.workers.lock().take() {
            if drained {
                pool.shutdown();
            } else {
                // A running callable may ignore cooperative cancellation
                // and block indefinitely; detach rather than join so
                // `stop` returns promptly as its own doc comment promises.
                pool.shutdown_detached();
            }
        }
        self.delay.shutdown();

        self.state.store(EngineState::Stopped as u8, Ordering::Release);
        tracing::info!("engine stopped");
        self.events.publish(Event::EngineStopped {
            at: crate::clock::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(workers: usize) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.workers = workers;
        cfg.min_workers = 0;
        cfg.max_workers = workers.max(cfg.max_workers);
        cfg.queue_capacity_total = 64;
        cfg
    }

    #[test]
    fn submit_then_wait_returns_completed_value() {
        let engine = Engine::new(test_config(2));
        engine.start().unwrap();

        let handle = engine
            .submit(|_| Ok::<i32, TaskError>(21 * 2), SubmitOptions::default())
            .unwrap();
        match handle.wait(Some(Duration::from_secs(2))) {
            crate::future::WaitOutcome::Ready(crate::future::Outcome::Completed(v)) => {
                assert_eq!(*v, 42)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        engine.stop(true, Some(Duration::from_secs(2))).unwrap();
    }

    #[test]
    fn submit_rejected_when_engine_not_running() {
        let engine = Engine::new(test_config(1));
        let err = engine.submit(|_| Ok::<(), TaskError>(()), SubmitOptions::default());
        assert!(matches!(err, Err(EngineError::EngineStopped)));
    }

    #[test]
    fn lookup_unknown_task_fails() {
        let engine = Engine::new(test_config(1));
        engine.start().unwrap();
        let result: Result<FutureHandle<()>> = engine.lookup(TaskId::from_raw(999));
        assert!(matches!(result, Err(EngineError::TaskNotFound { .. })));
        engine.stop(false, None).unwrap();
    }

    #[test]
    fn cancel_pending_task_returns_true_and_is_idempotent() {
        let engine = Engine::new(test_config(0));
        engine.start().unwrap();

        let handle = engine
            .submit(|_| Ok::<(), TaskError>(()), SubmitOptions::default())
            .unwrap();
        assert!(engine.cancel(handle.task_id()).unwrap());
        assert!(!engine.cancel(handle.task_id()).unwrap());
        engine.stop(false, None).unwrap();
    }

    #[test]
    fn worker_count_outside_bounds_is_clamped() {
        let mut cfg = test_config(100);
        cfg.min_workers = 1;
        cfg.max_workers = 4;
        let engine = Engine::new(cfg);
        engine.start().unwrap();
        assert_eq!(engine.stats().total_workers, 4);
        engine.stop(false, None).unwrap();
    }

    #[test]
    fn release_removes_a_terminal_entry_from_the_registry() {
        let engine = Engine::new(test_config(1));
        engine.start().unwrap();

        let handle = engine
            .submit(|_| Ok::<i32, TaskError>(1), SubmitOptions::default())
            .unwrap();
        handle.wait(Some(Duration::from_secs(2)));
        let task_id = handle.task_id();
        engine.release(task_id).unwrap();
        let result: Result<FutureHandle<i32>> = engine.lookup(task_id);
        assert!(matches!(result, Err(EngineError::TaskNotFound { .. })));
        engine.stop(false, None).unwrap();
    }
}
