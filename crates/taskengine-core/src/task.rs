//! Task descriptors and the Result Cell.
//!
//! A [`Descriptor`] is the immutable record created at submission time; it
//! owns the opaque callable and scheduling metadata. A [`ResultCell`] is the
//! mutable, thread-safe terminal-state container shared between the worker
//! that runs the task and every [`crate::future::FutureHandle`] that
//! refers to it.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::{self, Timestamp};
use crate::error::TaskError;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Unique, monotonically increasing identifier for a submitted task.
///
/// Stable across retries of the same task; never reused within a process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    /// The raw numeric value, useful for logging and display.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Issues strictly increasing [`TaskId`]s for one engine instance.
#[derive(Debug, Default)]
pub(crate) struct TaskIdGenerator {
    next: AtomicU64,
}

impl TaskIdGenerator {
    pub(crate) fn next(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority class. Lower value is served first:
/// `Critical < High < Normal < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// All four priority classes, in dispatch order.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index into a fixed-size `[T; 4]` array keyed by priority.
    #[must_use]
    pub fn index(self) -> usize {
        self as u8 as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task. Terminal states are [`Completed`](Self::Completed),
/// [`Failed`](Self::Failed), and [`Cancelled`](Self::Cancelled); a task
/// reaches at most one of them, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal handed to a running callable.
///
/// Setting the flag never terminates the callable by itself — a task that
/// never checks [`CancellationToken::is_cancelled`] runs to completion (or
/// times out). This mirrors the spec's explicit choice not to require hard
/// thread termination.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raises the flag. Returns `true` the first time it transitions from
    /// unset to set.
    pub(crate) fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

/// Type-erased success payload of a completed task, shared by every
/// observer (multiple [`crate::future::FutureHandle`]s, callbacks, and
/// `wait()` callers may all read the same terminal value concurrently).
pub type TaskOutput = Arc<dyn Any + Send + Sync>;

/// The opaque callable a task wraps. Boxed so the scheduler and queues
/// never need to know the concrete task's type.
///
/// `Fn`, not `FnOnce`: a task accepted for retry is invoked again from the
/// same descriptor, so the callable must tolerate being called more than
/// once (its own side effects, if any, are its author's concern).
pub type TaskBody =
    Box<dyn Fn(&CancellationToken) -> Result<TaskOutput, TaskError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Immutable record describing one submission. Retries reuse the same
/// `id` and `cell`, but get a fresh `retry_count` on the copy handed back
/// to the scheduler (the authoritative `retry_count` lives on the
/// [`ResultCell`]).
pub(crate) struct Descriptor {
    pub id: TaskId,
    pub priority: Priority,
    pub body: TaskBody,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
    pub cell: Arc<ResultCell>,
}

impl Descriptor {
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cell.cancel_token.clone()
    }
}

// ---------------------------------------------------------------------------
// Result Cell
// ---------------------------------------------------------------------------

/// Snapshot of a Result Cell's fields, handed to callbacks and returned by
/// [`crate::future::FutureHandle::stats`]. Cheap to clone: the success/error
/// payloads are reference-counted.
#[derive(Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub status: TaskStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub worker_id: Option<usize>,
    /// Wall-clock submission time, for logging and display only — every
    /// ordering decision in the engine goes through [`crate::clock`]'s
    /// monotonic [`Timestamp`] instead.
    pub created_at_utc: chrono::DateTime<chrono::Utc>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub(crate) value: Option<TaskOutput>,
    pub(crate) error: Option<Arc<TaskError>>,
}

impl std::fmt::Debug for TaskSnapshot {
    // `value` is a type-erased `dyn Any` and carries no `Debug` impl of its
    // own; everything else prints normally.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSnapshot")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("worker_id", &self.worker_id)
            .field("created_at_utc", &self.created_at_utc)
            .field("created_at", &self.created_at)
            .field("started_at", &self.started_at)
            .field("completed_at", &self.completed_at)
            .field("has_value", &self.value.is_some())
            .field("error", &self.error)
            .finish()
    }
}

impl TaskSnapshot {
    fn new(id: TaskId, priority: Priority, created_at: Timestamp) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            worker_id: None,
            created_at_utc: chrono::Utc::now(),
            created_at,
            started_at: None,
            completed_at: None,
            value: None,
            error: None,
        }
    }
}

type Callback = Box<dyn FnOnce(&TaskSnapshot) + Send>;

/// Mutable, thread-safe container for a task's terminal state.
///
/// Every mutating operation is serialized through `state`'s mutex;
/// terminal transitions are one-shot (§4.2). Callbacks are stored
/// separately so the terminal-transition code path can release the state
/// lock before invoking them, allowing re-entrant `submit` calls from
/// inside a callback (the common `then`-chaining pattern).
pub struct ResultCell {
    state: Mutex<TaskSnapshot>,
    condvar: Condvar,
    callbacks: Mutex<Vec<Callback>>,
    cancel_token: CancellationToken,
}

impl ResultCell {
    pub(crate) fn new(id: TaskId, priority: Priority) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskSnapshot::new(id, priority, clock::now())),
            condvar: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
        })
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.lock().clone()
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status().is_terminal()
    }

    /// `Pending|Retrying -> Running`. Fails if the cell is already
    /// terminal (e.g. raced with a cancellation).
    pub(crate) fn transition_to_running(&self, worker_id: usize) -> Result<(), ()> {
        let mut st = self.state.lock();
        if st.status.is_terminal() {
            return Err(());
        }
        st.status = TaskStatus::Running;
        st.worker_id = Some(worker_id);
        st.started_at = Some(clock::now());
        Ok(())
    }

    /// `Running -> Completed`. No-op if already terminal.
    pub(crate) fn complete(&self, value: TaskOutput) {
        self.finish(TaskStatus::Completed, Some(value), None);
    }

    /// `Running -> Failed`. No-op if already terminal.
    pub(crate) fn fail(&self, error: TaskError) {
        self.finish(TaskStatus::Failed, None, Some(Arc::new(error)));
    }

    fn finish(&self, status: TaskStatus, value: Option<TaskOutput>, error: Option<Arc<TaskError>>) {
        let snapshot = {
            let mut st = self.state.lock();
            if st.status.is_terminal() {
                return;
            }
            st.status = status;
            st.value = value;
            st.error = error;
            st.completed_at = Some(clock::now());
            st.clone()
        };
        self.condvar.notify_all();
        self.run_callbacks(&snapshot);
    }

    /// `Pending|Retrying -> Cancelled` directly, or sets the cooperative
    /// cancellation flag on a `Running` task. Returns `true` the first
    /// time cancellation is accepted for this cell, `false` on every
    /// subsequent call (idempotence, §8 invariant 6) and whenever the
    /// task has already reached `Completed`/`Failed`.
    pub(crate) fn cancel(&self) -> bool {
        if !self.cancel_token.raise() {
            return false;
        }

        let snapshot = {
            let mut st = self.state.lock();
            match st.status {
                TaskStatus::Pending | TaskStatus::Retrying => {
                    st.status = TaskStatus::Cancelled;
                    st.completed_at = Some(clock::now());
                    st.clone()
                }
                TaskStatus::Running => return true,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                    return false;
                }
            }
        };
        self.condvar.notify_all();
        self.run_callbacks(&snapshot);
        true
    }

    /// Called by the worker when it observes the cooperative cancellation
    /// flag on a `Running` task and the callable did not otherwise
    /// terminate it. `Running -> Cancelled`.
    pub(crate) fn finish_cancelled(&self) {
        let snapshot = {
            let mut st = self.state.lock();
            if st.status.is_terminal() {
                return;
            }
            st.status = TaskStatus::Cancelled;
            st.completed_at = Some(clock::now());
            st.clone()
        };
        self.condvar.notify_all();
        self.run_callbacks(&snapshot);
    }

    /// `Running -> Retrying` with `retry_count += 1`. Fails if the retry
    /// budget is exhausted or the cell is already terminal.
    pub(crate) fn schedule_retry(&self, max_retries: u32) -> Result<u32, ()> {
        let mut st = self.state.lock();
        if st.status.is_terminal() {
            return Err(());
        }
        if st.retry_count >= max_retries {
            return Err(());
        }
        st.retry_count += 1;
        st.status = TaskStatus::Retrying;
        st.started_at = None;
        Ok(st.retry_count)
    }

    /// Blocks until the cell reaches a terminal state or `timeout`
    /// elapses. Never mutates the cell.
    pub(crate) fn wait_raw(&self, timeout: Option<Duration>) -> Option<TaskSnapshot> {
        let mut st = self.state.lock();
        match timeout {
            None => {
                while !st.status.is_terminal() {
                    self.condvar.wait(&mut st);
                }
                Some(st.clone())
            }
            Some(timeout) => {
                let deadline = clock::now() + timeout;
                loop {
                    if st.status.is_terminal() {
                        return Some(st.clone());
                    }
                    let remaining = deadline.saturating_duration_since(clock::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    let result = self.condvar.wait_for(&mut st, remaining);
                    if result.timed_out() && !st.status.is_terminal() {
                        return None;
                    }
                }
            }
        }
    }

    /// Registers `cb`. If the cell is already terminal, invokes it
    /// synchronously (without holding any lock). Otherwise the callback
    /// runs exactly once, on the thread that performs the terminal
    /// transition.
    pub(crate) fn add_callback(&self, cb: Callback) {
        let already_terminal = {
            let st = self.state.lock();
            if st.status.is_terminal() {
                Some(st.clone())
            } else {
                None
            }
        };
        if let Some(snapshot) = already_terminal {
            cb(&snapshot);
            return;
        }
        self.callbacks.lock().push(cb);
    }

    fn run_callbacks(&self, snapshot: &TaskSnapshot) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for cb in callbacks {
            cb(snapshot);
        }
    }
}
