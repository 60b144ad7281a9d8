//! Time source for the scheduler.
//!
//! Every "now" reading in the scheduler goes through [`Clock`] so tests can
//! inject deterministic time. Wall-clock readings are fixed to Asia/Tokyo
//! (+09:00, no daylight saving).

use chrono::{DateTime, Duration, FixedOffset, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

const JST_OFFSET_SECONDS: i32 = 9 * 3600;

/// The scheduler's fixed timezone offset (+09:00).
pub fn jst() -> FixedOffset {
    match FixedOffset::east_opt(JST_OFFSET_SECONDS) {
        Some(offset) => offset,
        None => unreachable!("+09:00 is a valid offset"),
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in the scheduler timezone.
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time in Asia/Tokyo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&jst())
    }
}

/// Settable clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given instant.
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<FixedOffset>) {
        *self.now.lock() = instant;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock()
    }
}
