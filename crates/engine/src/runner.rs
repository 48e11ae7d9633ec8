// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container-based build execution.
//!
//! The builder image is the jail: the job workspace and the shared
//! toolchain cache are the only mounts, and the build tool runs with a
//! fixed environment block. When the controller itself runs inside a
//! container, mount paths are rewritten onto the host-side workspace root.

use crate::error::EngineError;
use crate::subprocess::{self, LineSink, ProcessError};
use std::path::{Component, Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const CONTAINER_PROJECT_PATH: &str = "/workspace/repo";
const CONTAINER_PLATFORMIO_PATH: &str = "/root/.platformio";
const CONTAINER_BUILD_CACHE_PATH: &str = "/root/.platformio/build-cache";
const CONTAINER_CCACHE_PATH: &str = "/root/.platformio/.cache/ccache";

/// Everything the container runner needs from configuration.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub image: String,
    pub platformio_jobs: u32,
    /// Workspace root as this process sees it.
    pub work_dir: PathBuf,
    /// Workspace root as the docker daemon sees it, when they differ.
    pub docker_host_work_dir: Option<PathBuf>,
    pub platformio_cache: PathBuf,
    pub docker_host_cache: Option<PathBuf>,
}

/// Run the containerised build for one env, streaming output per line.
pub async fn run_build_container(
    cfg: &BuilderConfig,
    repo_path: &Path,
    env_name: &str,
    project_config_path: Option<&str>,
    cancel: &CancellationToken,
    on_line: Option<LineSink<'_>>,
) -> Result<(), EngineError> {
    let host_repo_path = resolve_docker_host_path(
        repo_path,
        &cfg.work_dir,
        cfg.docker_host_work_dir.as_deref(),
    )?;

    let host_cache_path = match &cfg.docker_host_cache {
        Some(cache) => cache.clone(),
        None => resolve_docker_host_path(
            &cfg.platformio_cache,
            &cfg.work_dir,
            cfg.docker_host_work_dir.as_deref(),
        )?,
    };

    let repo_mount = format!("{}:{}", host_repo_path.display(), CONTAINER_PROJECT_PATH);
    let cache_mount = format!("{}:{}", host_cache_path.display(), CONTAINER_PLATFORMIO_PATH);
    let jobs = cfg.platformio_jobs.to_string();

    let container_config = match project_config_path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(config_path) => Some(resolve_container_config_path(config_path)?),
        None => None,
    };

    let pio_jobs_env = format!("PLATFORMIO_RUN_JOBS={}", jobs);
    let build_cache_env = format!("PLATFORMIO_BUILD_CACHE_DIR={}", CONTAINER_BUILD_CACHE_PATH);
    let ccache_dir_env = format!("CCACHE_DIR={}", CONTAINER_CCACHE_PATH);
    let ccache_base_env = format!("CCACHE_BASEDIR={}", CONTAINER_PROJECT_PATH);

    let mut args: Vec<&str> = vec![
        "run",
        "--rm",
        "-e",
        "CI=true",
        "-e",
        "PLATFORMIO_NO_ANSI=true",
        "-e",
        &pio_jobs_env,
        "-e",
        &build_cache_env,
        "-e",
        &ccache_dir_env,
        "-e",
        &ccache_base_env,
        "-e",
        "CCACHE_COMPILERCHECK=content",
        "-e",
        "CCACHE_NOHASHDIR=true",
        "-e",
        "CCACHE_SLOPPINESS=time_macros",
        "-e",
        "CCACHE_MAXSIZE=2G",
        "-v",
        &repo_mount,
        "-v",
        &cache_mount,
        "-w",
        CONTAINER_PROJECT_PATH,
        &cfg.image,
        "run",
        "-d",
        CONTAINER_PROJECT_PATH,
    ];

    if let Some(config) = &container_config {
        args.push("-c");
        args.push(config);
    }

    args.push("-e");
    args.push(env_name);
    args.push("-j");
    args.push(&jobs);

    if let Some(sink) = on_line {
        sink(&format!("$ docker {}", args.join(" ")));
    }

    let mut cmd = Command::new("docker");
    cmd.args(&args);
    subprocess::run_streaming(cmd, cancel, on_line)
        .await
        .map_err(|source| match source {
            ProcessError::Cancelled => EngineError::Cancelled,
            source => EngineError::Command { context: "run build container", source },
        })
}

/// Map a controller-side path onto the docker host's view of the
/// workspace root. A no-op when no host root is configured.
pub(crate) fn resolve_docker_host_path(
    path: &Path,
    container_root: &Path,
    host_root: Option<&Path>,
) -> Result<PathBuf, EngineError> {
    let Some(host_root) = host_root else {
        return Ok(path.to_path_buf());
    };

    let rel = path.strip_prefix(container_root).map_err(|_| EngineError::PathOutsideRoot {
        path: path.display().to_string(),
        root: container_root.display().to_string(),
    })?;

    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(EngineError::PathOutsideRoot {
            path: path.display().to_string(),
            root: container_root.display().to_string(),
        });
    }

    if rel.as_os_str().is_empty() {
        return Ok(host_root.to_path_buf());
    }
    Ok(host_root.join(rel))
}

/// Validate the generated config path and anchor it inside the container
/// project directory.
pub(crate) fn resolve_container_config_path(config_path: &str) -> Result<String, EngineError> {
    let value = config_path.trim();
    if value.is_empty() {
        return Err(EngineError::ProjectConfigPath { reason: "path is required" });
    }

    let path = Path::new(value);
    if path.is_absolute() {
        return Err(EngineError::ProjectConfigPath { reason: "path must be relative" });
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => {
                return Err(EngineError::ProjectConfigPath {
                    reason: "path escapes the project directory",
                })
            }
        }
    }

    Ok(format!("{}/{}", CONTAINER_PROJECT_PATH, value.trim_start_matches("./")))
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
