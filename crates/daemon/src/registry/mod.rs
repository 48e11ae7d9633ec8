// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable-in-memory job registry and admission queue.
//!
//! Jobs live in one map, queued job IDs in one ordered list, both behind a
//! single lock; per-job state has its own lock inside [`Job`]. The lock
//! order is registry → job, never the reverse, and neither is held across
//! an await point.

mod worker;

use crate::config::Config;
use mfb_core::{
    Clock, Job, JobId, JobState, LogSubscription, OptionsError, Status, SystemClock,
    ValidateError,
};
use mfb_core::{validate_device_selection, validate_ref, validate_repo_url, Artifact, BuildOptions};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Admission queue capacity; overflow rejects the create call with `Busy`.
pub const QUEUE_CAPACITY: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("job not found")]
    JobNotFound,

    #[error("artifact not found")]
    ArtifactNotFound,

    #[error("build queue is full, try again later")]
    Busy,

    #[error("service is shutting down")]
    ShuttingDown,
}

/// Current registry load, for the health endpoint and federation peers.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    pub running_builds: usize,
    pub queued_builds: usize,
    pub concurrent_builds: usize,
}

pub(crate) struct RegistryState {
    pub(crate) jobs: HashMap<JobId, Arc<Job>>,
    /// Queued job IDs in admission order; a job leaves when a worker
    /// picks it up.
    pub(crate) queue_order: Vec<JobId>,
}

pub(crate) struct Shared<C: Clock> {
    pub(crate) cfg: Config,
    pub(crate) clock: C,
    pub(crate) state: RwLock<RegistryState>,
    queue_tx: mpsc::Sender<JobId>,
    /// Shared by all workers; kept here so the queue stays open even
    /// while no worker holds it.
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>,
    pub(crate) shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the job registry and its worker pool. Cheap to clone.
pub struct Registry<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> Registry<C> {
    /// Create the registry and start its workers and cleanup loop.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(cfg: Config, clock: C) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let shared = Arc::new(Shared {
            cfg,
            clock,
            state: RwLock::new(RegistryState {
                jobs: HashMap::new(),
                queue_order: Vec::new(),
            }),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let registry = Self { shared };
        registry.start();
        registry
    }

    fn start(&self) {
        let mut tasks = self.shared.tasks.lock();
        for worker_id in 1..=self.shared.cfg.concurrent_builds {
            tasks.push(tokio::spawn(worker::worker_loop(
                Arc::clone(&self.shared),
                Arc::clone(&self.shared.queue_rx),
                worker_id,
            )));
        }
        tasks.push(tokio::spawn(worker::cleanup_loop(Arc::clone(&self.shared))));
    }

    /// Signal shutdown and wait for workers to finish what they started.
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.shared.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Validate, admit, and enqueue a build request.
    pub fn create(
        &self,
        repo_url: &str,
        git_ref: &str,
        device: &str,
        options: BuildOptions,
    ) -> Result<JobState, RegistryError> {
        validate_repo_url(repo_url)?;
        validate_ref(git_ref)?;
        validate_device_selection(device)?;
        let options = options.normalize()?;

        let id = JobId::new();
        let workspace = self.shared.cfg.jobs_root.join(id.as_str());
        let job = Arc::new(Job::new(
            id,
            repo_url.trim(),
            git_ref.trim(),
            device.trim(),
            options,
            workspace,
            self.shared.clock.now_utc(),
        ));

        {
            let mut state = self.shared.state.write();
            state.jobs.insert(id, Arc::clone(&job));
            state.queue_order.push(id);
        }

        if let Err(err) = self.shared.queue_tx.try_send(id) {
            let mut state = self.shared.state.write();
            state.jobs.remove(&id);
            state.queue_order.retain(|queued| *queued != id);
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => RegistryError::Busy,
                mpsc::error::TrySendError::Closed(_) => RegistryError::ShuttingDown,
            });
        }

        let mut snapshot = job.snapshot();
        self.attach_queue_metadata(&mut snapshot);
        Ok(snapshot)
    }

    pub fn get(&self, job_id: &str) -> Result<JobState, RegistryError> {
        let job = self.job(job_id)?;
        let mut snapshot = job.snapshot();
        self.attach_queue_metadata(&mut snapshot);
        Ok(snapshot)
    }

    pub fn logs(&self, job_id: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self.job(job_id)?.logs())
    }

    pub fn subscribe(&self, job_id: &str) -> Result<LogSubscription, RegistryError> {
        Ok(self.job(job_id)?.subscribe())
    }

    pub fn artifact(&self, job_id: &str, artifact_id: &str) -> Result<Artifact, RegistryError> {
        self.job(job_id)?
            .artifact_by_id(artifact_id)
            .ok_or(RegistryError::ArtifactNotFound)
    }

    /// Current load for the health endpoint and peer probes.
    pub fn load(&self) -> LoadSnapshot {
        let state = self.shared.state.read();
        LoadSnapshot {
            running_builds: running_count(&state),
            queued_builds: state.queue_order.len(),
            concurrent_builds: self.shared.cfg.concurrent_builds,
        }
    }

    /// Remove expired terminal jobs and their workspaces now.
    pub async fn sweep(&self) {
        worker::sweep_expired(&self.shared).await;
    }

    /// For a queued job, fill in its 1-based queue position and a coarse
    /// ETA: `position × average-build-duration ÷ concurrency`, zero when a
    /// worker is free for it. The average comes from completed successful
    /// builds and falls back to half the build timeout.
    pub fn attach_queue_metadata(&self, snapshot: &mut JobState) {
        if snapshot.status != Status::Queued {
            return;
        }

        let state = self.shared.state.read();
        let Some(index) = state.queue_order.iter().position(|id| *id == snapshot.id) else {
            return;
        };
        let position = index + 1;
        snapshot.queue_position = Some(position);

        let concurrency = self.shared.cfg.concurrent_builds.max(1);
        let free_workers = concurrency.saturating_sub(running_count(&state));
        if position <= free_workers {
            snapshot.queue_eta_seconds = Some(0);
            return;
        }

        let average = average_success_secs(&state)
            .unwrap_or_else(|| self.shared.cfg.build_timeout.as_secs() / 2);
        snapshot.queue_eta_seconds = Some(position as u64 * average / concurrency as u64);
    }

    fn job(&self, job_id: &str) -> Result<Arc<Job>, RegistryError> {
        let state = self.shared.state.read();
        state.jobs.get(job_id).cloned().ok_or(RegistryError::JobNotFound)
    }
}

#[cfg(test)]
impl<C: Clock> Registry<C> {
    /// Insert a pre-shaped job directly, bypassing admission.
    pub(crate) fn insert_test_job(&self, job: Arc<Job>, queued: bool) {
        let mut state = self.shared.state.write();
        let id = job.id;
        state.jobs.insert(id, job);
        if queued {
            state.queue_order.push(id);
        }
    }

    pub(crate) fn job_handle(&self, job_id: &str) -> Option<Arc<Job>> {
        self.shared.state.read().jobs.get(job_id).cloned()
    }
}

fn running_count(state: &RegistryState) -> usize {
    state.jobs.values().filter(|job| job.status() == Status::Running).count()
}

fn average_success_secs(state: &RegistryState) -> Option<u64> {
    let mut total = 0u64;
    let mut count = 0u64;
    for job in state.jobs.values() {
        if job.status() != Status::Success {
            continue;
        }
        if let Some(secs) = job.run_duration_secs() {
            total += secs;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(total / count)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
