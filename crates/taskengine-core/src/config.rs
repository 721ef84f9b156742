//! Engine construction-time configuration.

use std::time::Duration;

/// Options consumed at [`crate::engine::Engine`] construction.
///
/// There is no file format for this — it is a plain struct, constructed
/// programmatically (the demo CLI layers [`clap`](https://docs.rs/clap)
/// on top and an optional `.env` via [`dotenvy`](https://docs.rs/dotenvy)).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads started by `start()`.
    pub workers: usize,
    /// Lower bound respected if auto-scaling is enabled; otherwise advisory.
    pub min_workers: usize,
    /// Upper bound respected if auto-scaling is enabled; otherwise advisory.
    pub max_workers: usize,
    /// Total capacity shared across the four priority queues.
    pub queue_capacity_total: usize,
    /// Fractional split across `[CRITICAL, HIGH, NORMAL, LOW]`; must sum to
    /// approximately `1.0`.
    pub queue_split: [f64; 4],
    /// Soft bound on retained terminal entries in the registry.
    pub retention_terminal_max: usize,
    /// Base for exponential retry backoff.
    pub retry_base_backoff_ms: u64,
    /// Cap applied to computed retry backoff.
    pub retry_max_backoff_ms: u64,
    /// Upper bound on the delay scheduler's sleep between timer
    /// recomputations; also the tolerance window for timeout overshoot.
    pub scheduler_tick_max_ms: u64,
    /// Applied when a submission omits an explicit timeout. `0` disables
    /// timeouts for that submission.
    pub default_timeout_ms: u64,
}

impl EngineConfig {
    /// Per-priority capacity derived from `queue_capacity_total` and
    /// `queue_split`, in `[CRITICAL, HIGH, NORMAL, LOW]` order.
    pub(crate) fn queue_capacities(&self) -> [usize; 4] {
        let total = self.queue_capacity_total as f64;
        let mut caps = [0usize; 4];
        for (i, frac) in self.queue_split.iter().enumerate() {
            caps[i] = ((total * frac).round() as usize).max(1);
        }
        caps
    }

    pub(crate) fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_max_ms)
    }

    pub(crate) fn default_timeout(&self) -> Option<Duration> {
        if self.default_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.default_timeout_ms))
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = (2 * cpu).min(32).max(1);
        Self {
            workers,
            min_workers: 2,
            max_workers: workers * 4,
            queue_capacity_total: 10_000,
            queue_split: [0.25, 0.25, 0.25, 0.25],
            retention_terminal_max: 10_000,
            retry_base_backoff_ms: 100,
            retry_max_backoff_ms: 30_000,
            scheduler_tick_max_ms: 100,
            default_timeout_ms: 30_000,
        }
    }
}
