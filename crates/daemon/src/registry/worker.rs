// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool and build pipeline execution.
//!
//! N workers drain one FIFO queue. Each job runs under its own
//! cancellation scope (a child of the global shutdown token) bounded by
//! the configured build timeout; subprocess children die with the scope.

use super::Shared;
use mfb_core::{format_duration, Artifact, Clock, Job, JobId};
use mfb_engine::error::EngineError;
use mfb_engine::{artifacts, cache, git, overrides, runner, variants};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) async fn worker_loop<C: Clock>(
    shared: Arc<Shared<C>>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>,
    worker_id: usize,
) {
    tracing::info!(worker_id, "build worker started");
    loop {
        let job_id = {
            let mut rx = queue.lock().await;
            tokio::select! {
                () = shared.shutdown.cancelled() => None,
                job_id = rx.recv() => job_id,
            }
        };
        let Some(job_id) = job_id else {
            tracing::info!(worker_id, "build worker stopped");
            return;
        };

        let Some(job) = begin_job(&shared, job_id) else {
            continue;
        };
        execute_job(&shared, job).await;
    }
}

/// Take the job out of the queue order and hand it to the worker.
fn begin_job<C: Clock>(shared: &Shared<C>, job_id: JobId) -> Option<Arc<Job>> {
    let mut state = shared.state.write();
    state.queue_order.retain(|queued| *queued != job_id);
    state.jobs.get(&job_id).cloned()
}

async fn execute_job<C: Clock>(shared: &Arc<Shared<C>>, job: Arc<Job>) {
    let max_lines = shared.cfg.max_log_lines;
    job.mark_running(shared.clock.now_utc());
    job.append_log(max_lines, &format!("build started for device {}", job.device));
    tracing::info!(job_id = %job.id, device = %job.device, "build started");

    if let Err(err) = tokio::fs::create_dir_all(&job.workspace).await {
        fail_job(shared, &job, &format!("create workspace: {}", err));
        return;
    }

    let cancel = shared.shutdown.child_token();
    let outcome =
        tokio::time::timeout(shared.cfg.build_timeout, run_pipeline(shared, &job, &cancel)).await;

    match outcome {
        Err(_elapsed) => {
            cancel.cancel();
            fail_job(
                shared,
                &job,
                &format!(
                    "build timeout reached after {}",
                    format_duration(shared.cfg.build_timeout)
                ),
            );
        }
        Ok(Err(err)) if err.is_cancelled() || shared.shutdown.is_cancelled() => {
            job.append_log(max_lines, "build cancelled");
            job.mark_cancelled(shared.clock.now_utc(), "build cancelled");
            tracing::info!(job_id = %job.id, "build cancelled");
        }
        Ok(Err(err)) => fail_job(shared, &job, &err.to_string()),
        Ok(Ok(artifacts)) => {
            job.append_log(
                max_lines,
                &format!("build completed, artifacts: {}", artifacts.len()),
            );
            job.mark_success(shared.clock.now_utc(), artifacts);
            tracing::info!(job_id = %job.id, "build succeeded");
        }
    }
}

/// clone → resolve → cache lookup → build → collect → cache store.
async fn run_pipeline<C: Clock>(
    shared: &Arc<Shared<C>>,
    job: &Arc<Job>,
    cancel: &CancellationToken,
) -> Result<Vec<Artifact>, EngineError> {
    let max_lines = shared.cfg.max_log_lines;
    let repo_path = job.workspace.join("repo");
    let sink_job = Arc::clone(job);
    let sink = move |line: &str| sink_job.append_log(max_lines, line);

    git::clone_repository(&job.repo_url, &job.git_ref, &repo_path, cancel, Some(&sink)).await?;
    let commit = git::rev_parse_head(&repo_path, cancel).await?;

    let resolved = variants::resolve_selection(&repo_path, &job.device)?
        .ok_or_else(|| EngineError::DeviceNotFound { selection: job.device.clone() })?;

    let cache_key = cache::cache_key(&job.repo_url, &commit, &resolved.env_name, &job.options);
    if let Ok(key) = &cache_key {
        match cache::load_artifacts(&shared.cfg.firmware_cache_root, key) {
            Ok(Some(artifacts)) => {
                job.append_log(
                    max_lines,
                    &format!(
                        "firmware cache hit for env {} at commit {}",
                        resolved.env_name,
                        short_commit(&commit)
                    ),
                );
                return Ok(artifacts);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "firmware cache lookup failed");
            }
        }
    }

    let build_overrides =
        overrides::prepare_build_overrides(&repo_path, &resolved.env_name, &commit, &job.options)?;
    let (build_env, config_path) = match &build_overrides {
        Some(o) => (o.env_name.as_str(), Some(o.config_path.as_str())),
        None => (resolved.env_name.as_str(), None),
    };

    runner::run_build_container(
        &shared.cfg.builder_config(),
        &repo_path,
        build_env,
        config_path,
        cancel,
        Some(&sink),
    )
    .await?;

    let artifacts =
        artifacts::collect_artifacts(&repo_path, build_env, &shared.cfg.firmware_extensions)?;

    if let Ok(key) = &cache_key {
        if let Err(err) = cache::store_artifacts(&shared.cfg.firmware_cache_root, key, &artifacts)
        {
            tracing::warn!(job_id = %job.id, error = %err, "firmware cache store failed");
        }
    }

    Ok(artifacts)
}

fn fail_job<C: Clock>(shared: &Arc<Shared<C>>, job: &Arc<Job>, message: &str) {
    let message = sanitize_message(shared, message);
    job.append_log(shared.cfg.max_log_lines, &format!("ERROR: {}", message));
    job.mark_failed(shared.clock.now_utc(), message.clone());
    tracing::info!(job_id = %job.id, error = %message, "build failed");
}

/// Keep controller-side filesystem layout out of client-visible messages.
fn sanitize_message<C: Clock>(shared: &Arc<Shared<C>>, message: &str) -> String {
    message.replace(&shared.cfg.work_dir.display().to_string(), "<workdir>")
}

fn short_commit(commit: &str) -> &str {
    let trimmed = commit.trim();
    if trimmed.len() <= 12 {
        trimmed
    } else {
        &trimmed[..12]
    }
}

pub(crate) async fn cleanup_loop<C: Clock>(shared: Arc<Shared<C>>) {
    let interval = shared.cfg.cleanup_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => return,
            _ = ticker.tick() => sweep_expired(&shared).await,
        }
    }
}

/// Drop terminal jobs older than the retention window and delete their
/// workspaces.
pub(crate) async fn sweep_expired<C: Clock>(shared: &Shared<C>) {
    let now = shared.clock.now_utc();
    let mut removed = Vec::new();
    {
        let mut state = shared.state.write();
        state.jobs.retain(|_, job| {
            if job.is_expired(now, shared.cfg.retention) {
                removed.push(job.workspace.clone());
                false
            } else {
                true
            }
        });
    }

    for path in &removed {
        if let Err(err) = tokio::fs::remove_dir_all(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "cleanup workspace failed");
            }
        }
    }

    if !removed.is_empty() {
        tracing::info!(removed = removed.len(), "cleanup removed expired jobs");
    }
}
