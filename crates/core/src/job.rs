// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identity, state machine, and per-job log fan-out.
//!
//! A [`Job`] is exclusively owned by the registry; workers and API handlers
//! see it through `Arc`. All mutable state sits behind one internal lock,
//! which is never held across an await point.

use crate::options::BuildOptions;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

crate::define_id! {
    /// Unique identifier for one admission to the build pipeline.
    pub struct JobId("job-");
}

/// Capacity of each subscriber's log queue. When a subscriber falls this
/// far behind, further lines are dropped for it (never for the buffer).
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Job lifecycle status. Progresses monotonically along
/// `queued → running → {success, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Cancelled)
    }
}

crate::simple_display! {
    Status {
        Queued => "queued",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// One produced firmware file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Stable per-job ID (1-based position after sorting).
    pub id: String,
    pub name: String,
    /// Forward-slash path relative to the build output root.
    pub relative_path: String,
    pub size: u64,
    #[serde(skip)]
    abs_path: PathBuf,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        relative_path: impl Into<String>,
        size: u64,
        abs_path: PathBuf,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            relative_path: relative_path.into(),
            size,
            abs_path,
        }
    }

    pub fn absolute_path(&self) -> &Path {
        &self.abs_path
    }

    /// Assign 1-based IDs by position. Callers sort by relative path first
    /// so the IDs are stable across requests for the same job.
    pub fn assign_ids(artifacts: &mut [Artifact]) {
        for (index, artifact) in artifacts.iter_mut().enumerate() {
            artifact.id = (index + 1).to_string();
        }
    }
}

/// Read-only snapshot of a job, shaped for the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub id: JobId,
    pub repo_url: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    pub git_ref: String,
    pub device: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub artifacts: Vec<Artifact>,
    pub log_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_eta_seconds: Option<u64>,
}

/// A single admission to the build pipeline, owning its workspace.
pub struct Job {
    pub id: JobId,
    pub repo_url: String,
    pub git_ref: String,
    pub device: String,
    pub options: BuildOptions,
    pub workspace: PathBuf,
    pub created_at: DateTime<Utc>,
    inner: Mutex<JobInner>,
}

struct JobInner {
    status: Status,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: String,
    artifacts: Vec<Artifact>,
    log_lines: VecDeque<String>,
    subscribers: HashMap<u64, mpsc::Sender<String>>,
    next_subscriber: u64,
}

/// Snapshot plus a live tail handed to one log consumer.
///
/// Dropping the subscription (or its guard) detaches the subscriber.
pub struct LogSubscription {
    pub snapshot: Vec<String>,
    pub stream: mpsc::Receiver<String>,
    pub guard: SubscriberGuard,
}

/// Detaches the subscriber queue from the job on drop.
pub struct SubscriberGuard {
    job: Weak<Job>,
    key: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if let Some(job) = self.job.upgrade() {
            job.inner.lock().subscribers.remove(&self.key);
        }
    }
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        repo_url: impl Into<String>,
        git_ref: impl Into<String>,
        device: impl Into<String>,
        options: BuildOptions,
        workspace: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            repo_url: repo_url.into(),
            git_ref: git_ref.into(),
            device: device.into(),
            options,
            workspace,
            created_at: now,
            inner: Mutex::new(JobInner {
                status: Status::Queued,
                started_at: None,
                finished_at: None,
                error: String::new(),
                artifacts: Vec::new(),
                log_lines: VecDeque::with_capacity(256),
                subscribers: HashMap::new(),
                next_subscriber: 0,
            }),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    pub fn snapshot(&self) -> JobState {
        let inner = self.inner.lock();
        JobState {
            id: self.id,
            repo_url: self.repo_url.clone(),
            git_ref: self.git_ref.clone(),
            device: self.device.clone(),
            status: inner.status,
            created_at: self.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            error: inner.error.clone(),
            artifacts: inner.artifacts.clone(),
            log_lines: inner.log_lines.len(),
            queue_position: None,
            queue_eta_seconds: None,
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner.lock().log_lines.iter().cloned().collect()
    }

    /// Record a log line and fan it out to subscribers.
    ///
    /// Trailing CR/LF is trimmed; empty lines are not recorded. The buffer
    /// keeps the last `max_lines` lines. Fan-out never blocks: a subscriber
    /// whose queue is full simply misses the line.
    pub fn append_log(&self, max_lines: usize, line: &str) {
        let clean = line.trim_end_matches(['\r', '\n']);
        if clean.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        inner.log_lines.push_back(clean.to_string());
        while inner.log_lines.len() > max_lines {
            inner.log_lines.pop_front();
        }

        for sender in inner.subscribers.values() {
            let _ = sender.try_send(clean.to_string());
        }
    }

    /// Attach a log subscriber.
    ///
    /// Returns the current buffer as a snapshot plus a bounded live queue.
    /// If the job is already terminal the queue is returned closed and the
    /// snapshot holds the full buffer.
    pub fn subscribe(self: &Arc<Self>) -> LogSubscription {
        let mut inner = self.inner.lock();
        let snapshot: Vec<String> = inner.log_lines.iter().cloned().collect();

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let key = inner.next_subscriber;
        inner.next_subscriber += 1;

        if !inner.status.is_terminal() {
            inner.subscribers.insert(key, tx);
        }
        // If terminal, tx drops here and the receiver reads as closed.

        LogSubscription {
            snapshot,
            stream: rx,
            guard: SubscriberGuard { job: Arc::downgrade(self), key },
        }
    }

    /// Transition `queued → running`. Later calls are ignored: the status
    /// machine only ever advances.
    pub fn mark_running(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if inner.status != Status::Queued {
            return;
        }
        inner.status = Status::Running;
        inner.started_at = Some(now);
    }

    pub fn mark_success(&self, now: DateTime<Utc>, artifacts: Vec<Artifact>) {
        self.finish(now, Status::Success, String::new(), artifacts);
    }

    pub fn mark_failed(&self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.finish(now, Status::Failed, reason.into(), Vec::new());
    }

    pub fn mark_cancelled(&self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.finish(now, Status::Cancelled, reason.into(), Vec::new());
    }

    fn finish(&self, now: DateTime<Utc>, status: Status, error: String, artifacts: Vec<Artifact>) {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return;
        }
        inner.status = status;
        inner.finished_at = Some(now);
        inner.error = error;
        inner.artifacts = artifacts;
        // Closing every sender ends the subscribers' streams once drained.
        inner.subscribers.clear();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.finished_at {
            Some(finished) => {
                let ttl = chrono::Duration::from_std(retention).unwrap_or(chrono::TimeDelta::MAX);
                now.signed_duration_since(finished) >= ttl
            }
            None => false,
        }
    }

    pub fn artifact_by_id(&self, artifact_id: &str) -> Option<Artifact> {
        let inner = self.inner.lock();
        inner.artifacts.iter().find(|a| a.id == artifact_id).cloned()
    }

    /// Seconds the job ran, once finished. Used for queue ETA accounting.
    pub fn run_duration_secs(&self) -> Option<u64> {
        let inner = self.inner.lock();
        match (inner.started_at, inner.finished_at) {
            (Some(started), Some(finished)) => {
                let secs = finished.signed_duration_since(started).num_seconds();
                Some(secs.max(0) as u64)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
