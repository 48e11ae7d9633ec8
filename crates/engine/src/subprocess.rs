// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess runner with line-oriented output streaming.
//!
//! Both stdout and stderr are drained concurrently into a single per-line
//! sink. The sink is called from the reader side; callers that touch shared
//! state must self-synchronise (the job log fan-out does its own locking).

use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Per-line output sink. Lines arrive without their trailing newline.
pub type LineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Maximum bytes per scanned line; longer output is split at this boundary.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("start `{command}`: {source}")]
    StartFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("read command output: {source}")]
    OutputRead { source: std::io::Error },

    #[error("command `{command}` exited with status {code}")]
    ExitedNonZero { command: String, code: i32 },
}

/// Run a command to completion, streaming its output line by line.
///
/// Fails with [`ProcessError::Cancelled`] if the token fires before or
/// during execution; the child is killed in that case. A non-zero exit
/// maps to [`ProcessError::ExitedNonZero`] with the process exit code
/// (-1 when terminated by a signal).
pub async fn run_streaming(
    mut cmd: Command,
    cancel: &CancellationToken,
    on_line: Option<LineSink<'_>>,
) -> Result<(), ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let command_name = program_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::StartFailed {
        command: command_name.clone(),
        source,
    })?;

    // Piped stdio above guarantees both handles exist.
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let drain = async {
        let (out, err) = tokio::join!(
            scan_lines(stdout, on_line),
            scan_lines(stderr, on_line),
        );
        out.and(err)
    };
    tokio::pin!(drain);

    let drained = tokio::select! {
        result = &mut drain => result,
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ProcessError::Cancelled);
        }
    };

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|source| ProcessError::OutputRead { source })?
        }
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ProcessError::Cancelled);
        }
    };

    if !status.success() {
        return Err(ProcessError::ExitedNonZero {
            command: command_name,
            code: status.code().unwrap_or(-1),
        });
    }

    drained.map_err(|source| ProcessError::OutputRead { source })
}

/// Run a command and capture its stdout.
///
/// On non-zero exit the trimmed stderr (falling back to stdout, then the
/// exit status) becomes the error message. Used for short plumbing
/// commands such as `git ls-remote`.
pub async fn run_capture(
    mut cmd: Command,
    cancel: &CancellationToken,
) -> Result<String, CaptureError> {
    if cancel.is_cancelled() {
        return Err(CaptureError::Cancelled);
    }

    let command_name = program_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| CaptureError::Failed {
        message: format!("start `{}`: {}", command_name, source),
    })?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|source| CaptureError::Failed {
                message: format!("read `{}` output: {}", command_name, source),
            })?
        }
        () = cancel.cancelled() => return Err(CaptureError::Cancelled),
    };

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = match (stderr.trim(), stdout.trim()) {
        ("", "") => format!("exit status {}", output.status.code().unwrap_or(-1)),
        ("", out) => out.to_string(),
        (err, _) => err.to_string(),
    };
    Err(CaptureError::Failed { message })
}

/// Failure modes of [`run_capture`]. Deliberately message-shaped: callers
/// wrap the text into their own stage error.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("{message}")]
    Failed { message: String },
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Scan a stream into whole lines, enforcing the 1 MiB line cap.
///
/// Oversized lines are emitted in [`MAX_LINE_BYTES`] chunks. The final
/// unterminated line (if any) is emitted at EOF.
async fn scan_lines<R>(mut reader: R, on_line: Option<LineSink<'_>>) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::with_capacity(8 * 1024);
    let mut chunk = [0u8; 8 * 1024];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..read]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            emit(&pending[..pos], on_line);
            pending.drain(..=pos);
        }

        while pending.len() >= MAX_LINE_BYTES {
            emit(&pending[..MAX_LINE_BYTES], on_line);
            pending.drain(..MAX_LINE_BYTES);
        }
    }

    if !pending.is_empty() {
        emit(&pending, on_line);
    }
    Ok(())
}

fn emit(bytes: &[u8], on_line: Option<LineSink<'_>>) {
    if let Some(sink) = on_line {
        let line = String::from_utf8_lossy(bytes);
        sink(line.trim_end_matches('\r'));
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
