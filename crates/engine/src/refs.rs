// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote refs discovery: default branch plus recent branches and tags.
//!
//! `ls-remote` gives the authoritative lists; a best-effort shallow fetch
//! into a throwaway repo adds commit dates so the lists can be ordered by
//! recency. Enrichment failures never fail the call.

use crate::error::EngineError;
use crate::git::capture_git;
use chrono::{DateTime, TimeZone, Utc};
use mfb_core::validate_ref;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const MAX_RECENT_BRANCHES: usize = 20;
const MAX_RECENT_TAGS: usize = 20;

/// One remote ref. `updated_at` is absent when the date is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Snapshot of a repository's interesting refs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRefs {
    pub repo_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    pub recent_branches: Vec<RepoRef>,
    pub recent_tags: Vec<RepoRef>,
}

/// Discover the default branch and recent branches/tags of a remote.
pub async fn discover_refs(
    discovery_root: &Path,
    repo_url: &str,
    cancel: &CancellationToken,
) -> Result<RepoRefs, EngineError> {
    let head = capture_git(&["ls-remote", "--symref", repo_url, "HEAD"], cancel)
        .await
        .map_err(refs_error)?;
    let mut result = RepoRefs {
        repo_url: repo_url.to_string(),
        default_branch: parse_default_branch(&head),
        recent_branches: Vec::new(),
        recent_tags: Vec::new(),
    };

    let branches = capture_git(&["ls-remote", "--heads", repo_url], cancel)
        .await
        .map_err(refs_error)?;
    result.recent_branches = parse_ls_remote_refs(&branches, "refs/heads/");

    if let Ok(tags) = capture_git(&["ls-remote", "--tags", "--refs", repo_url], cancel).await {
        result.recent_tags = parse_ls_remote_refs(&tags, "refs/tags/");
    }

    // Best effort only: dates make the lists nicer, not correct.
    let _ = enrich_refs_with_dates(discovery_root, repo_url, &mut result, cancel).await;

    ensure_default_branch_present(&mut result);
    result.recent_branches.truncate(MAX_RECENT_BRANCHES);
    result.recent_tags.truncate(MAX_RECENT_TAGS);

    Ok(result)
}

/// Fetch shallowly into a throwaway repo and re-read the refs with
/// `for-each-ref`, which carries committer/creator dates.
async fn enrich_refs_with_dates(
    discovery_root: &Path,
    repo_url: &str,
    result: &mut RepoRefs,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let temp = tempfile::Builder::new()
        .prefix("refs-")
        .tempdir_in(discovery_root)
        .map_err(|source| EngineError::Io { context: "create refs workspace", source })?;

    let repo_path = temp.path().join("repo");
    std::fs::create_dir_all(&repo_path)
        .map_err(|source| EngineError::Io { context: "create refs repository directory", source })?;
    let repo = repo_path.display().to_string();

    capture_git(&["init", "--quiet", &repo], cancel).await?;
    capture_git(&["-C", &repo, "remote", "add", "origin", repo_url], cancel).await?;
    capture_git(
        &[
            "-C",
            &repo,
            "fetch",
            "--depth",
            "1",
            "--no-tags",
            "origin",
            "+refs/heads/*:refs/remotes/origin/*",
        ],
        cancel,
    )
    .await?;

    if let Ok(output) = capture_git(
        &[
            "-C",
            &repo,
            "for-each-ref",
            "refs/remotes/origin",
            "--sort=-committerdate",
            "--format=%(refname:strip=3)%09%(objectname)%09%(committerdate:unix)",
        ],
        cancel,
    )
    .await
    {
        let branches = parse_for_each_refs(&output);
        if !branches.is_empty() {
            result.recent_branches = branches;
        }
    }

    if capture_git(&["-C", &repo, "fetch", "--depth", "1", "--tags", "origin"], cancel)
        .await
        .is_ok()
    {
        if let Ok(output) = capture_git(
            &[
                "-C",
                &repo,
                "for-each-ref",
                "refs/tags",
                "--sort=-creatordate",
                "--format=%(refname:strip=2)%09%(objectname)%09%(creatordate:unix)",
            ],
            cancel,
        )
        .await
        {
            let tags = parse_for_each_refs(&output);
            if !tags.is_empty() {
                result.recent_tags = tags;
            }
        }
    }

    Ok(())
}

/// Parse `ls-remote --symref <url> HEAD` for the default branch name.
pub(crate) fn parse_default_branch(output: &str) -> Option<String> {
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] != "ref:" || fields[2] != "HEAD" {
            continue;
        }
        let Some(name) = fields[1].strip_prefix("refs/heads/") else {
            continue;
        };
        if validate_ref(name).is_ok() {
            return Some(name.to_string());
        }
    }
    None
}

/// Parse `ls-remote` output lines (`<sha>\t<refname>`) with the given
/// refname prefix. Refs with names failing validation are dropped.
pub(crate) fn parse_ls_remote_refs(output: &str, prefix: &str) -> Vec<RepoRef> {
    let mut refs = Vec::new();
    let mut seen = HashSet::new();

    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let (Some(commit), Some(refname), None) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Some(name) = refname.strip_prefix(prefix) else {
            continue;
        };
        if name.is_empty() || name == "HEAD" || validate_ref(name).is_err() {
            continue;
        }
        if !seen.insert(name.to_string()) {
            continue;
        }
        refs.push(RepoRef {
            name: name.to_string(),
            commit: Some(commit.trim().to_string()),
            updated_at: None,
        });
    }

    refs
}

/// Parse `for-each-ref` output (`<name>\t<sha>\t<unix-date>`); a date of
/// `0` means "unknown" and is left unset.
pub(crate) fn parse_for_each_refs(output: &str) -> Vec<RepoRef> {
    let mut refs = Vec::new();
    let mut seen = HashSet::new();

    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }

        let name = parts[0].trim();
        let commit = parts[1].trim();
        if name.is_empty() || name == "HEAD" || validate_ref(name).is_err() {
            continue;
        }
        if !seen.insert(name.to_string()) {
            continue;
        }

        let updated_at = parts
            .get(2)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|stamp| *stamp > 0)
            .and_then(|stamp| Utc.timestamp_opt(stamp, 0).single());

        refs.push(RepoRef {
            name: name.to_string(),
            commit: Some(commit.to_string()),
            updated_at,
        });
    }

    refs
}

/// The default branch is guaranteed to appear in the branch list.
pub(crate) fn ensure_default_branch_present(result: &mut RepoRefs) {
    let default = match &result.default_branch {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => {
            result.default_branch = result.recent_branches.first().map(|b| b.name.clone());
            return;
        }
    };

    if result.recent_branches.iter().any(|b| b.name == default) {
        return;
    }

    result.recent_branches.insert(
        0,
        RepoRef { name: default, commit: None, updated_at: None },
    );
}

fn refs_error(err: EngineError) -> EngineError {
    match err {
        EngineError::Cancelled => EngineError::Cancelled,
        EngineError::GitCommand { message } => EngineError::RefsDiscovery { message },
        other => other,
    }
}

#[cfg(test)]
#[path = "refs_tests.rs"]
mod tests;
