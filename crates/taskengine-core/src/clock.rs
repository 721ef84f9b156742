//! Monotonic time source.
//!
//! All scheduling, timeout, and latency decisions go through this module
//! rather than reading [`std::time::Instant::now`] directly, so that every
//! subsystem agrees on what "now" means and so wall-clock time never leaks
//! into an ordering decision.

use std::time::{Duration, Instant};

/// Monotonic timestamp used throughout the engine for ordering and timing.
///
/// A thin newtype over [`Instant`] rather than a bare `Instant` so call
/// sites read as domain vocabulary (`EligibleAt`, `StartedAt`) instead of
/// generic time math.
pub type Timestamp = Instant;

/// Returns the current monotonic timestamp.
#[inline]
#[must_use]
pub fn now() -> Timestamp {
    Instant::now()
}

/// Duration elapsed since `earlier`, saturating at zero if `earlier` is in
/// the future (can happen with coarse timer resolution on some platforms).
#[inline]
#[must_use]
pub fn duration_since(earlier: Timestamp) -> Duration {
    now().saturating_duration_since(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn duration_since_is_non_negative() {
        let t = now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(duration_since(t) >= Duration::from_millis(5));
    }
}
