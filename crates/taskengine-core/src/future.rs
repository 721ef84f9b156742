//! Future Handle: the caller-facing view of a Result Cell.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::task::{Priority, ResultCell, TaskBody, TaskId, TaskOutput, TaskSnapshot, TaskStatus};

/// Outcome of a terminal task, downcast to its concrete output type.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(Arc<T>),
    Failed(Arc<TaskError>),
    Cancelled,
}

/// Result of [`FutureHandle::wait`].
#[derive(Debug)]
pub enum WaitOutcome<T> {
    Ready(Outcome<T>),
    TimedOut,
}

/// Thin caller-side handle wrapping a [`TaskId`] and a shared reference to
/// its Result Cell. Cheap to clone; every clone refers to the same cell.
pub struct FutureHandle<T> {
    task_id: TaskId,
    cell: Arc<ResultCell>,
    engine: Option<Arc<Engine>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> FutureHandle<T> {
    pub(crate) fn new(task_id: TaskId, cell: Arc<ResultCell>, engine: Option<Arc<Engine>>) -> Self {
        Self {
            task_id,
            cell,
            engine,
            _marker: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Blocks until the task reaches a terminal state, or `timeout`
    /// elapses (blocks forever if `timeout` is `None`).
    #[must_use]
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome<T> {
        match self.cell.wait_raw(timeout) {
            None => WaitOutcome::TimedOut,
            Some(snapshot) => WaitOutcome::Ready(outcome_from_snapshot(&snapshot)),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// Registers a callback invoked on the thread that performs the
    /// terminal transition (or synchronously, right now, if already
    /// terminal). Callers must not do heavy work inside the callback.
    pub fn add_callback<F>(&self, cb: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.cell.add_callback(Box::new(move |snapshot| {
            cb(outcome_from_snapshot(snapshot));
        }));
    }

    /// Per-task record: status, timing, retry count, worker id.
    #[must_use]
    pub fn stats(&self) -> TaskSnapshot {
        self.cell.snapshot()
    }

    /// Returns a new handle that resolves to `transform(result)`.
    ///
    /// On success, registers a callback that submits a new
    /// `NORMAL`-priority task computing `transform` on the worker pool,
    /// and wires that task's outcome into the returned handle. On
    /// failure or cancellation, the error/cancellation propagates to the
    /// downstream handle directly, with no task submitted. Requires a
    /// handle obtained from `Engine::submit` or `Engine::lookup`.
    pub fn then<U, F>(&self, transform: F) -> FutureHandle<U>
    where
        U: Send + Sync + 'static,
        F: Fn(Arc<T>) -> U + Send + Sync + 'static,
    {
        let engine = self
            .engine
            .clone()
            .expect("`then` requires a handle obtained from Engine::submit");
        let downstream_cell = ResultCell::new(downstream_placeholder_id(), Priority::Normal);
        let downstream_handle = FutureHandle::<U>::new(
            downstream_placeholder_id(),
            Arc::clone(&downstream_cell),
            Some(Arc::clone(&engine)),
        );

        self.add_callback(move |outcome| match outcome {
            Outcome::Completed(value) => {
                let propagate_cell = Arc::clone(&downstream_cell);
                let body: TaskBody = Box::new(move |_token| {
                    Ok(Arc::new(transform(Arc::clone(&value))) as TaskOutput)
                });
                match engine.submit_erased(body, Priority::Normal) {
                    Ok(inner_cell) => inner_cell.add_callback(Box::new(move |inner| {
                        propagate_outcome(inner, &propagate_cell);
                    })),
                    Err(e) => downstream_cell.fail(TaskError::User(Box::new(e))),
                }
            }
            Outcome::Failed(error) => downstream_cell.fail(clone_task_error(&error)),
            Outcome::Cancelled => {
                downstream_cell.cancel();
            }
        });

        downstream_handle
    }

    /// Returns a new handle resolving to the original value on success, or
    /// to `handler(error)` on failure.
    pub fn catch<F>(&self, handler: F) -> FutureHandle<T>
    where
        F: Fn(Arc<TaskError>) -> T + Send + Sync + 'static,
    {
        let downstream_cell = ResultCell::new(downstream_placeholder_id(), Priority::Normal);
        let downstream_handle =
            FutureHandle::<T>::new(self.task_id, Arc::clone(&downstream_cell), self.engine.clone());

        self.add_callback(move |outcome| match outcome {
            Outcome::Completed(value) => {
                downstream_cell.complete(value as Arc<dyn Any + Send + Sync>);
            }
            Outcome::Failed(error) => {
                let recovered = handler(Arc::clone(&error));
                downstream_cell.complete(Arc::new(recovered) as Arc<dyn Any + Send + Sync>);
            }
            Outcome::Cancelled => {
                downstream_cell.cancel();
            }
        });

        downstream_handle
    }
}

// `then`/`catch` synthesize a fresh cell that is never inserted into the
// registry (it has no independent lifecycle of its own — it mirrors the
// upstream task's outcome). Its id is cosmetic.
fn downstream_placeholder_id() -> TaskId {
    TaskId::from_raw(u64::MAX)
}

fn clone_task_error(error: &TaskError) -> TaskError {
    match error {
        TaskError::Timeout {
            elapsed_ms,
            limit_ms,
        } => TaskError::Timeout {
            elapsed_ms: *elapsed_ms,
            limit_ms: *limit_ms,
        },
        TaskError::User(inner) => TaskError::User(Box::new(std::io::Error::other(inner.to_string()))),
    }
}

/// Copies a terminal snapshot's outcome into `downstream`. Used to wire a
/// `then`-submitted task's result into the handle returned to the caller
/// of `then`, before the inner task has necessarily run.
fn propagate_outcome(inner: &TaskSnapshot, downstream: &Arc<ResultCell>) {
    match inner.status {
        TaskStatus::Completed => downstream.complete(
            inner
                .value
                .clone()
                .expect("Completed snapshot must carry a value"),
        ),
        TaskStatus::Failed => downstream.fail(clone_task_error(
            inner
                .error
                .as_ref()
                .expect("Failed snapshot must carry an error"),
        )),
        TaskStatus::Cancelled => {
            downstream.cancel();
        }
        _ => unreachable!("propagate_outcome called on a non-terminal snapshot"),
    }
}

fn outcome_from_snapshot<T: Send + Sync + 'static>(snapshot: &TaskSnapshot) -> Outcome<T> {
    match snapshot.status {
        TaskStatus::Completed => {
            let value = snapshot
                .value
                .clone()
                .expect("Completed snapshot must carry a value")
                .downcast::<T>()
                .expect("task output type mismatch");
            Outcome::Completed(value)
        }
        TaskStatus::Failed => Outcome::Failed(
            snapshot
                .error
                .clone()
                .expect("Failed snapshot must carry an error"),
        ),
        TaskStatus::Cancelled => Outcome::Cancelled,
        _ => unreachable!("outcome requested from a non-terminal snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    #[test]
    fn wait_reports_completed_value() {
        let cell = ResultCell::new(TaskId::from_raw(1), Priority::Normal);
        cell.transition_to_running(0).unwrap();
        cell.complete(Arc::new(42i32) as Arc<dyn Any + Send + Sync>);

        let handle = FutureHandle::<i32>::new(TaskId::from_raw(1), cell, None);
        match handle.wait(None) {
            WaitOutcome::Ready(Outcome::Completed(v)) => assert_eq!(*v, 42),
            _ => panic!("expected Completed"),
        }
    }

    #[test]
    fn wait_reports_failure() {
        let cell = ResultCell::new(TaskId::from_raw(2), Priority::Normal);
        cell.transition_to_running(0).unwrap();
        cell.fail(TaskError::Timeout {
            elapsed_ms: 5,
            limit_ms: 1,
        });

        let handle = FutureHandle::<()>::new(TaskId::from_raw(2), cell, None);
        match handle.wait(None) {
            WaitOutcome::Ready(Outcome::Failed(e)) => assert_eq!(e.kind(), "timeout"),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn add_callback_fires_for_already_terminal_cell() {
        let cell = ResultCell::new(TaskId::from_raw(3), Priority::Normal);
        cell.transition_to_running(0).unwrap();
        cell.complete(Arc::new(()) as Arc<dyn Any + Send + Sync>);

        let handle = FutureHandle::<()>::new(TaskId::from_raw(3), cell, None);
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = Arc::clone(&fired);
        handle.add_callback(move |_| f.store(true, std::sync::atomic::Ordering::SeqCst));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
