// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed firmware cache.
//!
//! Entries are keyed by a SHA-256 over a canonical JSON document of the
//! build inputs, so the key is stable across processes and restarts. An
//! entry is published atomically: files and manifest are staged in a
//! sibling temp directory, then renamed into place. Losing the rename
//! race to a concurrent build of the same inputs counts as success.
//!
//! There is no eviction here; disk retention is managed outside.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use mfb_core::{Artifact, BuildOptions};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

const KEY_VERSION: u32 = 1;
const MANIFEST_VERSION: u32 = 1;
const FILES_DIR_NAME: &str = "files";
const MANIFEST_NAME: &str = "manifest.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyInput<'a> {
    version: u32,
    repo_url: &'a str,
    commit: String,
    env_name: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    build_flags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    lib_deps: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    version: u32,
    created_at: DateTime<Utc>,
    artifacts: Vec<ManifestArtifact>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestArtifact {
    name: String,
    relative_path: String,
    size: u64,
}

/// Compute the cache key for one build's inputs.
pub fn cache_key(
    repo_url: &str,
    commit: &str,
    env_name: &str,
    options: &BuildOptions,
) -> Result<String, EngineError> {
    let input = KeyInput {
        version: KEY_VERSION,
        repo_url: repo_url.trim(),
        commit: commit.trim().to_ascii_lowercase(),
        env_name: env_name.trim(),
        build_flags: options.build_flags.clone(),
        lib_deps: options.lib_deps.clone(),
    };

    if input.repo_url.is_empty() {
        return Err(EngineError::CacheKeyMissing { field: "repo URL" });
    }
    if input.commit.is_empty() {
        return Err(EngineError::CacheKeyMissing { field: "commit" });
    }
    if input.env_name.is_empty() {
        return Err(EngineError::CacheKeyMissing { field: "environment name" });
    }

    let payload = serde_json::to_vec(&input)
        .map_err(|e| EngineError::Io { context: "encode cache key payload", source: e.into() })?;
    Ok(hex_string(&Sha256::digest(&payload)))
}

/// Load a cache entry's artifacts, re-validating every listed path.
///
/// `Ok(None)` means "no entry"; corrupt entries are errors so the caller
/// can log and fall back to a real build.
pub fn load_artifacts(
    cache_root: &Path,
    cache_key: &str,
) -> Result<Option<Vec<Artifact>>, EngineError> {
    let cache_dir = cache_dir_path(cache_root, cache_key)?;

    let manifest_path = cache_dir.join(MANIFEST_NAME);
    let content = match std::fs::read(&manifest_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(EngineError::Io { context: "read cache manifest", source }),
    };

    let manifest: Manifest = serde_json::from_slice(&content)
        .map_err(|e| EngineError::Io { context: "decode cache manifest", source: e.into() })?;
    if manifest.version != MANIFEST_VERSION {
        return Err(EngineError::CacheManifestVersion { version: manifest.version });
    }
    if manifest.artifacts.is_empty() {
        return Err(EngineError::CacheManifestEmpty);
    }

    let mut artifacts = Vec::with_capacity(manifest.artifacts.len());
    for item in &manifest.artifacts {
        let path = artifact_file_path(&cache_dir, &item.relative_path)?;

        let metadata = std::fs::symlink_metadata(&path)
            .map_err(|source| EngineError::Io { context: "read cached artifact", source })?;
        if !metadata.is_file() {
            return Err(EngineError::CacheNotAFile { path: item.relative_path.clone() });
        }
        if item.size > 0 && metadata.len() != item.size {
            return Err(EngineError::CacheSizeMismatch { path: item.relative_path.clone() });
        }

        let name = if item.name.trim().is_empty() {
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        } else {
            item.name.trim().to_string()
        };

        artifacts.push(Artifact::new(name, item.relative_path.clone(), metadata.len(), path));
    }

    Artifact::assign_ids(&mut artifacts);
    Ok(Some(artifacts))
}

/// Store artifacts under the key, publishing atomically via rename.
pub fn store_artifacts(
    cache_root: &Path,
    cache_key: &str,
    artifacts: &[Artifact],
) -> Result<(), EngineError> {
    if artifacts.is_empty() {
        return Err(EngineError::CacheStoreEmpty);
    }

    let cache_dir = cache_dir_path(cache_root, cache_key)?;
    if cache_dir.exists() {
        return Ok(());
    }

    let temp = tempfile::Builder::new()
        .prefix("firmware-cache-")
        .tempdir_in(cache_root)
        .map_err(|source| EngineError::Io { context: "create temporary cache directory", source })?;

    let mut manifest = Manifest {
        version: MANIFEST_VERSION,
        created_at: Utc::now(),
        artifacts: Vec::with_capacity(artifacts.len()),
    };

    for artifact in artifacts {
        let destination = artifact_file_path(temp.path(), &artifact.relative_path)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| EngineError::Io { context: "store cached artifact", source })?;
        }
        std::fs::copy(artifact.absolute_path(), &destination)
            .map_err(|source| EngineError::Io { context: "store cached artifact", source })?;

        let size = std::fs::metadata(&destination)
            .map_err(|source| EngineError::Io { context: "read cached artifact", source })?
            .len();
        manifest.artifacts.push(ManifestArtifact {
            name: artifact.name.clone(),
            relative_path: artifact.relative_path.clone(),
            size,
        });
    }

    manifest.artifacts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let manifest_content = serde_json::to_vec(&manifest)
        .map_err(|e| EngineError::Io { context: "encode cache manifest", source: e.into() })?;
    std::fs::write(temp.path().join(MANIFEST_NAME), manifest_content)
        .map_err(|source| EngineError::Io { context: "write cache manifest", source })?;

    match std::fs::rename(temp.path(), &cache_dir) {
        Ok(()) => {
            // The staged directory is now the live entry; TempDir's
            // cleanup of the old path becomes a harmless no-op.
            Ok(())
        }
        Err(_) if cache_dir.exists() => Ok(()),
        Err(source) => Err(EngineError::Io { context: "activate firmware cache entry", source }),
    }
}

fn cache_dir_path(cache_root: &Path, cache_key: &str) -> Result<PathBuf, EngineError> {
    let key = cache_key.trim();
    if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(EngineError::CacheKeyInvalid);
    }
    Ok(cache_root.join(key))
}

/// Resolve a manifest-relative path under `files/`, rejecting anything
/// absolute or escaping.
fn artifact_file_path(cache_dir: &Path, relative_path: &str) -> Result<PathBuf, EngineError> {
    let trimmed = relative_path.trim();
    if trimmed.is_empty() {
        return Err(EngineError::CacheArtifactPath { path: relative_path.to_string() });
    }

    let rel = Path::new(trimmed);
    if rel.is_absolute() {
        return Err(EngineError::CacheArtifactPath { path: relative_path.to_string() });
    }
    let mut has_normal = false;
    for component in rel.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            _ => return Err(EngineError::CacheArtifactPath { path: relative_path.to_string() }),
        }
    }
    if !has_normal {
        return Err(EngineError::CacheArtifactPath { path: relative_path.to_string() });
    }

    Ok(cache_dir.join(FILES_DIR_NAME).join(rel))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{:02x}", b);
        acc
    })
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
