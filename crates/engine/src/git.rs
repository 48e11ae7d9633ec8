// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git plumbing for the build pipeline.
//!
//! All invocations are structured argv vectors, never a shell. Streamed
//! commands echo themselves to the job log as `$ git …` before running.

use crate::error::EngineError;
use crate::subprocess::{self, CaptureError, LineSink, ProcessError};
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Clone a repository shallowly and check out the requested ref.
///
/// - Clone is `--depth 1 --single-branch`.
/// - A non-empty ref is fetched shallowly and `FETCH_HEAD` checked out;
///   when the fetch fails (e.g. the ref is a commit SHA already present),
///   fall back to `checkout --force <ref>`.
/// - Submodules try the parallel shallow form first, then retry the
///   conservative form. A second failure is fatal.
pub async fn clone_repository(
    repo_url: &str,
    git_ref: &str,
    destination: &Path,
    cancel: &CancellationToken,
    on_line: Option<LineSink<'_>>,
) -> Result<(), EngineError> {
    let dest = path_str(destination);

    run_git(
        &["clone", "--depth", "1", "--single-branch", repo_url, &dest],
        cancel,
        on_line,
        "clone repository",
    )
    .await?;

    let git_ref = git_ref.trim();
    if !git_ref.is_empty() {
        let fetched = run_git(
            &["-C", &dest, "fetch", "--depth", "1", "origin", git_ref],
            cancel,
            on_line,
            "fetch ref",
        )
        .await;

        match fetched {
            Ok(()) => {
                run_git(
                    &["-C", &dest, "checkout", "--force", "FETCH_HEAD"],
                    cancel,
                    on_line,
                    "checkout fetched ref",
                )
                .await?;
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(_) => {
                run_git(
                    &["-C", &dest, "checkout", "--force", git_ref],
                    cancel,
                    on_line,
                    "checkout ref",
                )
                .await?;
            }
        }
    }

    let optimized = run_git(
        &[
            "-C",
            &dest,
            "-c",
            "submodule.fetchJobs=8",
            "submodule",
            "update",
            "--init",
            "--recursive",
            "--depth",
            "1",
            "--jobs",
            "8",
            "--recommend-shallow",
        ],
        cancel,
        on_line,
        "update submodules",
    )
    .await;

    match optimized {
        Ok(()) => Ok(()),
        Err(err) if err.is_cancelled() => Err(err),
        Err(_) => {
            if let Some(sink) = on_line {
                sink("submodule optimized mode failed, retrying with compatibility flags");
            }
            run_git(
                &[
                    "-C",
                    &dest,
                    "submodule",
                    "update",
                    "--init",
                    "--recursive",
                    "--depth",
                    "1",
                ],
                cancel,
                on_line,
                "update submodules",
            )
            .await
        }
    }
}

/// Resolve the checked-out HEAD commit of a repository.
pub async fn rev_parse_head(
    repo_path: &Path,
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    let dest = path_str(repo_path);
    let output = capture_git(&["-C", &dest, "rev-parse", "HEAD"], cancel).await?;
    Ok(output.trim().to_string())
}

async fn run_git(
    args: &[&str],
    cancel: &CancellationToken,
    on_line: Option<LineSink<'_>>,
    context: &'static str,
) -> Result<(), EngineError> {
    if let Some(sink) = on_line {
        sink(&format!("$ git {}", args.join(" ")));
    }
    let mut cmd = Command::new("git");
    cmd.args(args);
    subprocess::run_streaming(cmd, cancel, on_line)
        .await
        .map_err(|source| match source {
            ProcessError::Cancelled => EngineError::Cancelled,
            source => EngineError::Command { context, source },
        })
}

/// Capture-mode git helper for plumbing commands (`ls-remote`, `rev-parse`,
/// `for-each-ref`). The error message carries git's own stderr text.
pub(crate) async fn capture_git(
    args: &[&str],
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    subprocess::run_capture(cmd, cancel)
        .await
        .map_err(|err| match err {
            CaptureError::Cancelled => EngineError::Cancelled,
            CaptureError::Failed { message } => EngineError::GitCommand { message },
        })
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
