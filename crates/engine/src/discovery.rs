// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device discovery for the HTTP surface: throwaway clone, list targets.

use crate::error::EngineError;
use crate::git;
use crate::variants::{self, DiscoveredDevice};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Clone the repository into a `discover-*` workspace and list its
/// buildable devices. The workspace is removed on return.
pub async fn discover_devices(
    discovery_root: &Path,
    repo_url: &str,
    git_ref: &str,
    cancel: &CancellationToken,
) -> Result<Vec<DiscoveredDevice>, EngineError> {
    let temp = tempfile::Builder::new()
        .prefix("discover-")
        .tempdir_in(discovery_root)
        .map_err(|source| EngineError::Io { context: "create discovery workspace", source })?;

    let repo_path = temp.path().join("repo");
    git::clone_repository(repo_url, git_ref, &repo_path, cancel, None).await?;

    let devices = variants::list_devices(&repo_path)?;
    if devices.is_empty() {
        return Err(EngineError::NoDevices);
    }

    Ok(devices)
}
