// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact collection from the build output tree.

use crate::error::EngineError;
use mfb_core::Artifact;
use std::path::{Path, PathBuf};

/// Default firmware-extension whitelist. Matched against file-name
/// suffixes, case-insensitively.
pub const DEFAULT_FIRMWARE_EXTENSIONS: &[&str] =
    &[".bin", ".hex", ".uf2", ".elf", ".factory.bin", ".zip", ".map"];

/// Collect firmware files from `.pio/build/<env>/` under the repository.
///
/// Regular files only (symlink entries are skipped, not followed), filtered
/// by the extension whitelist, sorted by relative path, with 1-based IDs.
/// An empty result is an error: a successful build must produce firmware.
pub fn collect_artifacts(
    repo_path: &Path,
    env_name: &str,
    extensions: &[String],
) -> Result<Vec<Artifact>, EngineError> {
    let build_root = repo_path.join(".pio").join("build").join(env_name);
    let metadata = std::fs::metadata(&build_root)
        .map_err(|source| EngineError::BuildOutputMissing { source })?;
    if !metadata.is_dir() {
        return Err(EngineError::BuildOutputMissing {
            source: std::io::Error::other("build output path is not a directory"),
        });
    }

    let mut artifacts = Vec::with_capacity(32);
    scan(&build_root, &build_root, extensions, &mut artifacts)?;

    if artifacts.is_empty() {
        return Err(EngineError::NoArtifacts);
    }

    artifacts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Artifact::assign_ids(&mut artifacts);
    Ok(artifacts)
}

fn scan(
    build_root: &Path,
    dir: &Path,
    extensions: &[String],
    artifacts: &mut Vec<Artifact>,
) -> Result<(), EngineError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| EngineError::Io { context: "scan build artifacts", source })?;

    for entry in entries {
        let entry = entry
            .map_err(|source| EngineError::Io { context: "scan build artifacts", source })?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| EngineError::Io { context: "scan build artifacts", source })?;

        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            scan(build_root, &path, extensions, artifacts)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !matches_extension(&name, extensions) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|source| EngineError::Io { context: "scan build artifacts", source })?;

        artifacts.push(Artifact::new(
            name,
            relative_slash_path(build_root, &path),
            metadata.len(),
            path,
        ));
    }

    Ok(())
}

fn matches_extension(file_name: &str, extensions: &[String]) -> bool {
    let lowered = file_name.to_ascii_lowercase();
    extensions.iter().any(|ext| {
        let ext = ext.to_ascii_lowercase();
        if ext.starts_with('.') {
            lowered.ends_with(&ext)
        } else {
            lowered.ends_with(&format!(".{}", ext))
        }
    })
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel: &Path = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[path = "artifacts_tests.rs"]
mod tests;
