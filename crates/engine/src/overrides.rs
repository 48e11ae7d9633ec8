// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generated build-config overrides for user-supplied options.
//!
//! User flags and lib deps never reach a shell; they are written into a
//! synthesised config that extends the selected env, and the build tool is
//! pointed at that file.

use crate::error::EngineError;
use mfb_core::BuildOptions;
use sha2::{Digest, Sha256};
use std::path::Path;

/// File name of the synthesised config, at the repository root.
pub const OVERRIDE_CONFIG_NAME: &str = "mfb-build-override.ini";

const CUSTOM_ENV_PREFIX: &str = "mfb-custom-";
const SHORT_HASH_LEN: usize = 12;

/// Result of preparing overrides: the config path relative to the repo
/// and the synthesised env name to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOverrides {
    pub config_path: String,
    pub env_name: String,
}

/// Write the override config when options are present.
///
/// Empty options mean no file and the base env unchanged. The synthesised
/// env is named `mfb-custom-<hash>` so repeated builds with identical
/// inputs produce an identical config.
pub fn prepare_build_overrides(
    repo_path: &Path,
    base_env: &str,
    commit: &str,
    options: &BuildOptions,
) -> Result<Option<BuildOverrides>, EngineError> {
    if options.is_empty() {
        return Ok(None);
    }

    let env_name = format!(
        "{}{}",
        CUSTOM_ENV_PREFIX,
        short_options_hash(commit, base_env, options)
    );

    let mut content = String::with_capacity(512);
    content.push_str("[platformio]\n");
    content.push_str("extra_configs = platformio.ini\n");
    content.push('\n');
    content.push_str(&format!("[env:{}]\n", env_name));
    content.push_str(&format!("extends = env:{}\n", base_env));
    content.push_str("build_flags =\n");
    content.push_str(&format!("    ${{env:{}.build_flags}}\n", base_env));
    for flag in &options.build_flags {
        content.push_str(&format!("    {}\n", flag));
    }
    content.push_str("lib_deps =\n");
    content.push_str(&format!("    ${{env:{}.lib_deps}}\n", base_env));
    for dep in &options.lib_deps {
        content.push_str(&format!("    {}\n", dep));
    }

    std::fs::write(repo_path.join(OVERRIDE_CONFIG_NAME), content)
        .map_err(|source| EngineError::Io { context: "write build override config", source })?;

    Ok(Some(BuildOverrides {
        config_path: OVERRIDE_CONFIG_NAME.to_string(),
        env_name,
    }))
}

fn short_options_hash(commit: &str, base_env: &str, options: &BuildOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(commit.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(base_env.as_bytes());
    for flag in &options.build_flags {
        hasher.update(b"\nflag:");
        hasher.update(flag.as_bytes());
    }
    for dep in &options.lib_deps {
        hasher.update(b"\ndep:");
        hasher.update(dep.as_bytes());
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(SHORT_HASH_LEN);
    for byte in digest.iter().take(SHORT_HASH_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

#[cfg(test)]
#[path = "overrides_tests.rs"]
mod tests;
