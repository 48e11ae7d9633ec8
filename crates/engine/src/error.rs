// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline error taxonomy.
//!
//! One enum for the whole engine: stage context is carried in the variant
//! so the worker can surface a single sanitised message on the job, and
//! cancellation stays distinguishable from genuine failures.

use crate::subprocess::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,

    /// A streamed subprocess stage failed ("clone repository", "run build
    /// container", …).
    #[error("{context}: {source}")]
    Command {
        context: &'static str,
        source: ProcessError,
    },

    /// A filesystem step failed.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        source: std::io::Error,
    },

    #[error("git command failed: {message}")]
    GitCommand { message: String },

    #[error("read repository refs: {message}")]
    RefsDiscovery { message: String },

    #[error("no build targets found in variants directory")]
    NoDevices,

    #[error("device {selection:?} was not found in variants directory")]
    DeviceNotFound { selection: String },

    #[error("target {selection:?} is ambiguous, choose one of: {options}")]
    AmbiguousEnv { selection: String, options: String },

    #[error("device {selection:?} is ambiguous, choose one of: {options}")]
    AmbiguousDirectory { selection: String, options: String },

    #[error("device {path:?} has no [env:*] targets in platformio.ini")]
    NoEnvTargets { path: String },

    #[error("device {path:?} has multiple build targets, choose one of: {options}")]
    MultipleEnvTargets { path: String, options: String },

    #[error(transparent)]
    Validate(#[from] mfb_core::ValidateError),

    #[error("path {path:?} is outside the configured work directory {root:?}")]
    PathOutsideRoot { path: String, root: String },

    #[error("project config path is invalid: {reason}")]
    ProjectConfigPath { reason: &'static str },

    #[error("read build output directory: {source}")]
    BuildOutputMissing { source: std::io::Error },

    #[error("no firmware artifacts found in build output")]
    NoArtifacts,

    #[error("cache key requires {field}")]
    CacheKeyMissing { field: &'static str },

    #[error("invalid firmware cache key")]
    CacheKeyInvalid,

    #[error("unsupported cache manifest version: {version}")]
    CacheManifestVersion { version: u32 },

    #[error("cache manifest contains no artifacts")]
    CacheManifestEmpty,

    #[error("invalid artifact relative path {path:?}")]
    CacheArtifactPath { path: String },

    #[error("cached artifact {path:?} size mismatch")]
    CacheSizeMismatch { path: String },

    #[error("cached artifact {path:?} is not a regular file")]
    CacheNotAFile { path: String },

    #[error("no artifacts to store in firmware cache")]
    CacheStoreEmpty,
}

impl EngineError {
    /// True when the error is a cooperative-cancellation signal rather
    /// than a real failure. The worker maps these to `cancelled` jobs.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            EngineError::Cancelled
                | EngineError::Command { source: ProcessError::Cancelled, .. }
        )
    }
}
