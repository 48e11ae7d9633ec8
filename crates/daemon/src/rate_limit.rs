// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client sliding-window rate limiter for build creation.
//!
//! Timestamps are tracked per client host; requests older than the window
//! are expired on the next check. A periodic sweep keeps the host map from
//! growing without bound under churny traffic.

use chrono::{DateTime, Utc};
use mfb_core::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Run a full sweep of stale hosts every this many checks.
const SWEEP_EVERY: u64 = 256;

pub struct RateLimiter<C: Clock = SystemClock> {
    clock: C,
    window: Duration,
    max_requests: usize,
    state: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    checks: AtomicU64,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(clock: C, window: Duration, max_requests: usize) -> Self {
        Self {
            clock,
            window,
            max_requests,
            state: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    /// Record a request from the host if it fits in the window.
    /// Returns false when the host is over its limit.
    pub fn allow(&self, host: &str) -> bool {
        let now = self.clock.now_utc();
        let threshold = now - chrono::Duration::from_std(self.window).unwrap_or_default();

        let mut state = self.state.lock();

        let checks = self.checks.fetch_add(1, Ordering::Relaxed);
        if checks > 0 && checks % SWEEP_EVERY == 0 {
            state.retain(|_, stamps| {
                stamps.retain(|stamp| *stamp > threshold);
                !stamps.is_empty()
            });
        }

        let stamps = state.entry(host.to_string()).or_default();
        stamps.retain(|stamp| *stamp > threshold);

        if stamps.len() >= self.max_requests {
            return false;
        }

        stamps.push(now);
        true
    }

    /// Number of hosts currently tracked, for tests and debugging.
    pub fn tracked_hosts(&self) -> usize {
        self.state.lock().len()
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
