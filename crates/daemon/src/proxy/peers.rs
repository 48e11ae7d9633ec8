// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer pool health state for the federation layer.
//!
//! The daemon tracks `{healthy, lastCheckedAt, unavailableUntil}` and a
//! load score per allowed backend, and publishes the table through the
//! health endpoint. Picking a gateway from the pool is the job of the
//! pool-sharing client; this side only records what that choice needs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Health record for one peer backend, as served by `/api/healthz`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHealth {
    pub url: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// `runningBuilds/concurrency + queuedBuilds/concurrency` from the
    /// peer's health endpoint; clients use it for least-loaded dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_score: Option<f64>,
    /// End of the cooldown window after a failure; clients skip the
    /// peer until then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_until: Option<DateTime<Utc>>,
}

/// The set of allowed peer backends and what is known about them.
pub struct PeerPool {
    peers: Vec<String>,
    cooldown: Duration,
    health: Mutex<HashMap<String, PeerHealth>>,
}

impl PeerPool {
    pub fn new(peers: Vec<String>, cooldown: Duration) -> Self {
        let health = peers
            .iter()
            .map(|url| {
                (
                    url.clone(),
                    PeerHealth {
                        url: url.clone(),
                        healthy: true,
                        last_checked_at: None,
                        load_score: None,
                        unavailable_until: None,
                    },
                )
            })
            .collect();
        Self { peers, cooldown, health: Mutex::new(health) }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn urls(&self) -> &[String] {
        &self.peers
    }

    /// Pool membership is the proxy allow-list.
    pub fn contains(&self, url: &str) -> bool {
        self.peers.iter().any(|peer| peer == url)
    }

    /// Put a peer in cooldown after a transport error or 502/503/504.
    pub fn mark_unavailable(&self, url: &str, now: DateTime<Utc>) {
        let mut health = self.health.lock();
        if let Some(entry) = health.get_mut(url) {
            entry.healthy = false;
            entry.last_checked_at = Some(now);
            entry.unavailable_until =
                Some(now + chrono::Duration::from_std(self.cooldown).unwrap_or_default());
            tracing::warn!(peer = url, "backend marked unavailable");
        }
    }

    /// Record a health-probe result.
    pub fn mark_probe(&self, url: &str, healthy: bool, load_score: Option<f64>, now: DateTime<Utc>) {
        let mut health = self.health.lock();
        if let Some(entry) = health.get_mut(url) {
            entry.healthy = healthy;
            entry.last_checked_at = Some(now);
            entry.load_score = load_score;
            if healthy {
                entry.unavailable_until = None;
            } else {
                entry.unavailable_until =
                    Some(now + chrono::Duration::from_std(self.cooldown).unwrap_or_default());
            }
        }
    }

    /// Per-peer health for the health endpoint, in pool order.
    pub fn snapshot(&self) -> Vec<PeerHealth> {
        let health = self.health.lock();
        self.peers
            .iter()
            .filter_map(|peer| health.get(peer).cloned())
            .collect()
    }
}

#[cfg(test)]
#[path = "peers_tests.rs"]
mod tests;
