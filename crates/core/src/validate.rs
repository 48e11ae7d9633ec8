// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical sanitation of repository URLs, git refs, and device selectors.
//!
//! Every failure carries a stable, human-readable reason; nothing is
//! silently rewritten beyond leading/trailing whitespace.

use url::Url;

/// Validation failures with stable messages surfaced to API clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    #[error("repoUrl is required")]
    RepoUrlRequired,

    #[error("repoUrl must not contain whitespace")]
    RepoUrlWhitespace,

    #[error("repoUrl is invalid: {reason}")]
    RepoUrlInvalid { reason: String },

    #[error("repoUrl must include scheme and host")]
    RepoUrlMissingHost,

    #[error("unsupported repository scheme")]
    RepoUrlScheme,

    #[error("repoUrl path is invalid")]
    RepoUrlPath,

    #[error("ref contains unsupported characters")]
    RefCharacters,

    #[error("device is required")]
    DeviceRequired,

    #[error("device contains unsupported characters")]
    DeviceCharacters,

    #[error("device contains invalid path traversal")]
    DeviceTraversal,

    #[error("device contains invalid path separators")]
    DeviceSeparators,

    #[error("device path is invalid")]
    DevicePath,
}

const MAX_REF_LEN: usize = 128;

/// Validate a repository URL.
///
/// Accepts `scheme://host[/path]` with scheme ∈ {http, https, ssh, git}
/// and a non-empty host, or SCP-like `user@host:path[.git]`. Whitespace,
/// `..` path segments, and other schemes (notably `file`) are rejected.
pub fn validate_repo_url(raw: &str) -> Result<(), ValidateError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidateError::RepoUrlRequired);
    }
    if value.chars().any(|c| c == ' ' || c == '\t' || c == '\n' || c == '\r') {
        return Err(ValidateError::RepoUrlWhitespace);
    }

    if is_scp_like(value) {
        return Ok(());
    }

    let parsed = Url::parse(value)
        .map_err(|e| ValidateError::RepoUrlInvalid { reason: e.to_string() })?;

    let host = parsed.host_str().unwrap_or("");
    if parsed.scheme().is_empty() || host.is_empty() {
        return Err(ValidateError::RepoUrlMissingHost);
    }

    match parsed.scheme() {
        "http" | "https" | "ssh" | "git" => {}
        _ => return Err(ValidateError::RepoUrlScheme),
    }

    // The parser resolves dot-segments away, so traversal has to be
    // caught on the raw input.
    if value.contains("..") {
        return Err(ValidateError::RepoUrlPath);
    }

    Ok(())
}

/// Validate a git ref. Empty means "use the default branch".
pub fn validate_ref(raw: &str) -> Result<(), ValidateError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_REF_LEN || !value.chars().all(is_ref_char) {
        return Err(ValidateError::RefCharacters);
    }
    Ok(())
}

/// Validate a device (build environment) name.
pub fn validate_device(raw: &str) -> Result<(), ValidateError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidateError::DeviceRequired);
    }
    if !value.chars().all(is_ref_char) {
        return Err(ValidateError::DeviceCharacters);
    }
    if value.contains("..") {
        return Err(ValidateError::DeviceTraversal);
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(ValidateError::DeviceSeparators);
    }
    Ok(())
}

/// Validate a device selection, which may address a variant by its
/// relative path (internal `/` allowed, never `//` or `..`).
pub fn validate_device_selection(raw: &str) -> Result<(), ValidateError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidateError::DeviceRequired);
    }
    if !value.chars().all(is_ref_char) {
        return Err(ValidateError::DeviceCharacters);
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(ValidateError::DevicePath);
    }
    if value.contains("//") || value.contains("..") {
        return Err(ValidateError::DevicePath);
    }
    Ok(())
}

/// `[A-Za-z0-9._/-]`, shared by refs and device selectors.
fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')
}

/// `[A-Za-z0-9._-]`, the host/user class of SCP-like addresses.
fn is_scp_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// `user@host:path`, the SCP-like form git accepts without a scheme.
fn is_scp_like(value: &str) -> bool {
    let Some((user, rest)) = value.split_once('@') else {
        return false;
    };
    let Some((host, path)) = rest.split_once(':') else {
        return false;
    };
    !user.is_empty()
        && user.chars().all(is_scp_atom_char)
        && !host.is_empty()
        && host.chars().all(is_scp_atom_char)
        && !path.is_empty()
        && path.chars().all(is_ref_char)
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
