//! Multi-priority, worker-pool-driven background task execution engine.
//!
//! The [`Engine`] accepts user-supplied callables, schedules them across a
//! fixed pool of OS-thread workers under priority and delay constraints,
//! executes them with timeout and retry semantics, and exposes results
//! through [`FutureHandle`]. See the module list below for the pieces
//! that make that up:
//!
//! - [`clock`] — monotonic time source.
//! - [`task`] — task ids, priorities, the descriptor, and the Result Cell.
//! - [`queue`] — bounded per-priority dispatch queues.
//! - [`delay`] — the delay/retry min-heap scheduler.
//! - [`worker`] — the worker pool's dispatch loop.
//! - [`registry`] — task id → Result Cell lookup with bounded retention.
//! - [`stats`] — atomic counters and latency percentiles.
//! - [`events`] — the optional observer hook.
//! - [`config`] — engine construction options.
//! - [`future`] — the caller-facing Future Handle.
//! - [`engine`] — the facade tying everything together.
//! - [`error`] — engine- and task-level error types.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod future;
pub mod stats;
pub mod task;

pub(crate) mod delay;
pub(crate) mod queue;
pub(crate) mod registry;
pub(crate) mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, SubmitOptions};
pub use error::{EngineError, TaskError};
pub use events::Event;
pub use future::{FutureHandle, Outcome, WaitOutcome};
pub use stats::StatsSnapshot;
pub use task::{CancellationToken, Priority, TaskId, TaskSnapshot, TaskStatus};
