// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides the current time.
///
/// `now()` is monotonic and used for durations; `now_utc()` is wall-clock
/// time used for the timestamps the API serialises.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
    utc: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            utc: Arc::new(Mutex::new(
                DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_000_000),
            )),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
        let mut utc = self.utc.lock();
        *utc += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    /// Set the wall-clock time to a specific instant
    pub fn set_utc(&self, when: DateTime<Utc>) {
        *self.utc.lock() = when;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
