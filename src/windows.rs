//! Time-window partitioning for parallel crawling.

use chrono::{DateTime, Utc};

/// Split `[start, end)` into `workers` contiguous sub-intervals.
///
/// Returns `workers + 1` monotonically non-decreasing boundaries: the
/// first equals `start`, interior boundaries are interpolated with an
/// equal-length step, and the last is pinned to `end` exactly so step
/// rounding never loses the tail of the interval.
pub fn partition(start: DateTime<Utc>, end: DateTime<Utc>, workers: usize) -> Vec<DateTime<Utc>> {
    debug_assert!(workers > 0, "partition requires at least one worker");
    let workers = workers.max(1);

    let step = (end - start) / workers as i32;
    let mut boundaries = Vec::with_capacity(workers + 1);
    for idx in 0..workers {
        boundaries.push(start + step * idx as i32);
    }
    boundaries.push(end);
    boundaries
}

/// Resolve the configured worker count, defaulting to one worker per
/// available core when unset (zero) in the config.
pub fn effective_workers(configured: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
