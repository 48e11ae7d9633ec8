// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Variant discovery and selection.
//!
//! A variant project is any directory under `variants/` containing a
//! `platformio.ini`; the walk never descends past one (variants do not
//! nest). The INI reader is deliberately approximate: it understands
//! exactly the `[env]` / `[env:NAME]` sections, `build_flags` / `lib_deps`
//! options, comments, and continuation lines that variant configs use.

use crate::error::EngineError;
use mfb_core::{validate_device, validate_device_selection, BuildOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const COMMON_ENV_KEY: &str = "__common_env__";

/// One buildable target advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub options: BuildOptions,
}

/// A directory under `variants/` holding a `platformio.ini`.
#[derive(Debug, Clone)]
struct VariantProject {
    /// Directory basename.
    name: String,
    /// Forward-slash path relative to `variants/`.
    relative_path: String,
    absolute_path: PathBuf,
    /// `[env:*]` names in source order.
    env_names: Vec<String>,
    /// Per-env options with `[env]` commons prepended.
    env_options: HashMap<String, BuildOptions>,
}

/// A user selection resolved to a concrete build target.
#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    pub project_dir: PathBuf,
    pub relative_path: String,
    pub env_name: String,
    pub options: BuildOptions,
}

/// List every buildable env across all variant projects, sorted by name.
pub fn list_devices(repo_path: &Path) -> Result<Vec<DiscoveredDevice>, EngineError> {
    let entries = collect_variant_projects(&repo_path.join("variants"))?;

    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    for entry in &entries {
        for env_name in &entry.env_names {
            let target = env_name.trim();
            if target.is_empty() || validate_device_selection(target).is_err() {
                continue;
            }
            if !seen.insert(target.to_string()) {
                continue;
            }
            let options = entry.env_options.get(target).cloned().unwrap_or_default();
            devices.push(DiscoveredDevice { name: target.to_string(), options });
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Resolve a user selection to a single build target.
///
/// Strict priority: exact variant relative path, then exact env name,
/// then exact directory basename. Ambiguity is an error listing the
/// candidates; a plain non-match resolves to `None`, never a guess.
pub fn resolve_selection(
    repo_path: &Path,
    selection: &str,
) -> Result<Option<ResolvedVariant>, EngineError> {
    validate_device_selection(selection)?;

    let entries = collect_variant_projects(&repo_path.join("variants"))?;
    let normalized = selection.trim();

    for entry in &entries {
        if entry.relative_path == normalized {
            return resolve_entry_environment(entry).map(Some);
        }
    }

    let mut env_matches: Vec<(&VariantProject, &str)> = Vec::new();
    for entry in &entries {
        if let Some(env) = entry.env_names.iter().find(|env| env.as_str() == normalized) {
            env_matches.push((entry, env));
        }
    }
    if env_matches.len() == 1 {
        let (entry, env) = env_matches[0];
        return Ok(Some(resolved(entry, env)));
    }
    if env_matches.len() > 1 {
        let mut options: Vec<String> = env_matches
            .iter()
            .map(|(entry, env)| format!("{} ({})", entry.relative_path, env))
            .collect();
        options.sort();
        return Err(EngineError::AmbiguousEnv {
            selection: normalized.to_string(),
            options: options.join(", "),
        });
    }

    let name_matches: Vec<&VariantProject> =
        entries.iter().filter(|entry| entry.name == normalized).collect();
    match name_matches.len() {
        0 => Ok(None),
        1 => resolve_entry_environment(name_matches[0]).map(Some),
        _ => {
            let paths: Vec<String> =
                name_matches.iter().map(|entry| entry.relative_path.clone()).collect();
            Err(EngineError::AmbiguousDirectory {
                selection: normalized.to_string(),
                options: paths.join(", "),
            })
        }
    }
}

/// Pick the env for a project matched by path or basename: a single env
/// wins outright, and with several the one named like the directory wins.
fn resolve_entry_environment(entry: &VariantProject) -> Result<ResolvedVariant, EngineError> {
    if entry.env_names.is_empty() {
        return Err(EngineError::NoEnvTargets { path: entry.relative_path.clone() });
    }
    if entry.env_names.len() == 1 {
        return Ok(resolved(entry, &entry.env_names[0]));
    }

    if let Some(env) = entry.env_names.iter().find(|env| **env == entry.name) {
        return Ok(resolved(entry, env));
    }

    Err(EngineError::MultipleEnvTargets {
        path: entry.relative_path.clone(),
        options: entry.env_names.join(", "),
    })
}

fn resolved(entry: &VariantProject, env_name: &str) -> ResolvedVariant {
    ResolvedVariant {
        project_dir: entry.absolute_path.clone(),
        relative_path: entry.relative_path.clone(),
        env_name: env_name.to_string(),
        options: entry.env_options.get(env_name).cloned().unwrap_or_default(),
    }
}

/// Walk `variants/` collecting projects, sorted by relative path.
fn collect_variant_projects(variants_dir: &Path) -> Result<Vec<VariantProject>, EngineError> {
    let mut entries = Vec::new();
    walk(variants_dir, variants_dir, &mut entries)?;
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

fn walk(
    variants_dir: &Path,
    dir: &Path,
    entries: &mut Vec<VariantProject>,
) -> Result<(), EngineError> {
    let read = std::fs::read_dir(dir)
        .map_err(|source| EngineError::Io { context: "read variants directory", source })?;

    let mut children: Vec<PathBuf> = Vec::new();
    for item in read {
        let item =
            item.map_err(|source| EngineError::Io { context: "read variants directory", source })?;
        let file_type = item
            .file_type()
            .map_err(|source| EngineError::Io { context: "read variants directory", source })?;
        if file_type.is_dir() {
            children.push(item.path());
        }
    }
    children.sort();

    for child in children {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with('.') {
            continue;
        }

        if child.join("platformio.ini").is_file() {
            let rel = relative_slash_path(variants_dir, &child);
            if validate_device_selection(&rel).is_err() {
                // A project at an unaddressable path cannot be selected,
                // but its subtree may still hold well-named projects.
                walk(variants_dir, &child, entries)?;
                continue;
            }
            let (env_names, env_options) = read_env_config(&child)?;
            if env_names.is_empty() {
                walk(variants_dir, &child, entries)?;
                continue;
            }
            entries.push(VariantProject {
                name,
                relative_path: rel,
                absolute_path: child,
                env_names,
                env_options,
            });
            // Variants do not nest.
            continue;
        }

        walk(variants_dir, &child, entries)?;
    }

    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read `[env:*]` names and their options from a project's `platformio.ini`.
fn read_env_config(
    project_dir: &Path,
) -> Result<(Vec<String>, HashMap<String, BuildOptions>), EngineError> {
    let content = std::fs::read_to_string(project_dir.join("platformio.ini"))
        .map_err(|source| EngineError::Io { context: "read platformio.ini", source })?;
    Ok(parse_env_config(&content))
}

/// Approximate INI reader for PlatformIO configs.
///
/// Recognised: `[env]` (common defaults), `[env:NAME]` (one target),
/// `build_flags` / `lib_deps` options, `;`/`#` comments (inline only when
/// preceded by whitespace), and continuation lines (leading space or tab
/// immediately after a recognised option).
pub(crate) fn parse_env_config(content: &str) -> (Vec<String>, HashMap<String, BuildOptions>) {
    let mut env_names: Vec<String> = Vec::new();
    let mut all_options: HashMap<String, BuildOptions> = HashMap::new();

    let mut current_env: Option<String> = None;
    let mut current_option: Option<&'static str> = None;

    for line in content.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            current_option = None;
            continue;
        }
        if trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }

        if let Some(section) = parse_section_header(trimmed) {
            current_option = None;

            if section.eq_ignore_ascii_case("env") {
                current_env = Some(COMMON_ENV_KEY.to_string());
                all_options.entry(COMMON_ENV_KEY.to_string()).or_default();
                continue;
            }

            match parse_env_target(&section) {
                Some(env_name) if validate_device(&env_name).is_ok() => {
                    all_options.entry(env_name.clone()).or_default();
                    if !env_names.contains(&env_name) {
                        env_names.push(env_name.clone());
                    }
                    current_env = Some(env_name);
                }
                _ => current_env = None,
            }
            continue;
        }

        let Some(env) = current_env.clone() else {
            current_option = None;
            continue;
        };

        let is_continuation = (line.starts_with(' ') || line.starts_with('\t'))
            && current_option.is_some();
        if is_continuation {
            let value = parse_option_value(trimmed);
            if !value.is_empty() {
                if let Some(option) = current_option {
                    append_option_value(&mut all_options, &env, option, value);
                }
            }
            continue;
        }

        let Some((key, value)) = split_ini_option(trimmed) else {
            current_option = None;
            continue;
        };

        match key.to_ascii_lowercase().as_str() {
            "build_flags" => {
                current_option = Some("build_flags");
                let parsed = parse_option_value(value);
                if !parsed.is_empty() {
                    append_option_value(&mut all_options, &env, "build_flags", parsed);
                }
            }
            "lib_deps" => {
                current_option = Some("lib_deps");
                let parsed = parse_option_value(value);
                if !parsed.is_empty() {
                    append_option_value(&mut all_options, &env, "lib_deps", parsed);
                }
            }
            _ => current_option = None,
        }
    }

    // Prepend the [env] commons to every target's lists.
    let common = all_options.get(COMMON_ENV_KEY).cloned().unwrap_or_default();
    let mut resolved = HashMap::with_capacity(env_names.len());
    for env_name in &env_names {
        let own = all_options.get(env_name).cloned().unwrap_or_default();
        let mut build_flags = common.build_flags.clone();
        build_flags.extend(own.build_flags);
        let mut lib_deps = common.lib_deps.clone();
        lib_deps.extend(own.lib_deps);
        resolved.insert(env_name.clone(), BuildOptions { build_flags, lib_deps });
    }

    (env_names, resolved)
}

/// `[ name ]` with optional trailing comment → inner name, else `None`.
fn parse_section_header(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix('[')?;
    let close = rest.find(']')?;
    let name = rest[..close].trim();
    if name.is_empty() {
        return None;
    }

    let tail = rest[close + 1..].trim_start();
    if !tail.is_empty() && !tail.starts_with(';') && !tail.starts_with('#') {
        return None;
    }
    Some(name.to_string())
}

/// `env : NAME` → `NAME`. The `env` prefix is lowercase by convention.
fn parse_env_target(section: &str) -> Option<String> {
    let rest = section.strip_prefix("env")?;
    let rest = rest.trim_start().strip_prefix(':')?;
    let name = rest.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

fn split_ini_option(line: &str) -> Option<(&str, &str)> {
    let index = line.find('=')?;
    let key = line[..index].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[index + 1..].trim()))
}

/// Strip an inline comment: `;` or `#` begins one only at the start of
/// the value or when preceded by whitespace.
fn parse_option_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let bytes = trimmed.as_bytes();
    for index in 0..bytes.len() {
        let byte = bytes[index];
        if byte != b';' && byte != b'#' {
            continue;
        }
        if index == 0 {
            return String::new();
        }
        let prev = bytes[index - 1];
        if prev != b' ' && prev != b'\t' {
            continue;
        }
        return trimmed[..index].trim().to_string();
    }

    trimmed.to_string()
}

fn append_option_value(
    options: &mut HashMap<String, BuildOptions>,
    env_name: &str,
    option: &str,
    value: String,
) {
    let entry = options.entry(env_name.to_string()).or_default();
    match option {
        "build_flags" => entry.build_flags.push(value),
        "lib_deps" => entry.lib_deps.push(value),
        _ => {}
    }
}

#[cfg(test)]
#[path = "variants_tests.rs"]
mod tests;
