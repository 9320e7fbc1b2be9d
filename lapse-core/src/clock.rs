//! Time sources
//!
//! The scheduler never reads the wall clock directly; it asks a [`Clock`]
//! passed in at construction.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored once, then advanced by tokio's monotonic clock
///
/// Immune to wall clock jumps, and follows paused time in
/// `#[tokio::test(start_paused = true)]` tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    started: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current wall time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock that reads `anchor` right now
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or(chrono::Duration::MAX);
        self.anchor
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
