//! Time source abstraction.
//!
//! Trigger dates, expiry dates and lease heartbeats are all computed from an injected
//! [`Clock`] so tests can move time deterministically. Session budgets (how long a
//! `listen` call keeps polling) use the tokio monotonic clock instead.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::fmt;

use crate::error::{NotifierError, Result};

/// Wall-clock source for timestamp math
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// `at + delta`, failing instead of overflowing the representable date range
pub fn checked_after(at: DateTime<Utc>, delta: TimeDelta) -> Result<DateTime<Utc>> {
    at.checked_add_signed(delta).ok_or_else(|| {
        NotifierError::invalid_argument(format!("{at} + {delta} is outside the supported date range"))
    })
}

/// `at + seconds`; see [`checked_after`]
pub fn checked_after_seconds(at: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(seconds).ok_or_else(|| {
        NotifierError::invalid_argument(format!("{seconds} seconds is outside the supported range"))
    })?;
    checked_after(at, delta)
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current system time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
