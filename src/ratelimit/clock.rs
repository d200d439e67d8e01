//! Time sources for sliding-window decisions.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time, in nanoseconds since the Unix epoch.
///
/// Rate windows take a clock at construction so tests can move time
/// forward without sleeping.
pub trait Clock: Send + Sync + Debug {
    /// Current time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc::now()`.
///
/// Every process sharing a store must use a wall clock: attempt records are
/// compared across instances, so a per-process monotonic origin would not work.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        // None only past the year 2262.
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying time, so advancing one clone advances
/// them all.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_nanos`.
    pub fn new(start_nanos: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_nanos)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(nanos))
            })
            .ok();
    }

    /// Jump to an absolute time.
    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
