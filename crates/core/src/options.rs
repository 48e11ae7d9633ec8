// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-supplied build options: compiler flags and library dependencies.

use serde::{Deserialize, Serialize};

const MAX_ITEMS: usize = 128;
const MAX_ITEM_LEN: usize = 512;

/// Two ordered lists of single-line strings handed to the build tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    pub build_flags: Vec<String>,
    pub lib_deps: Vec<String>,
}

/// Rejections from [`BuildOptions::normalize`], with stable messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("{field} supports up to {} entries", MAX_ITEMS)]
    TooManyEntries { field: &'static str },

    #[error("{field} entry exceeds {} characters", MAX_ITEM_LEN)]
    EntryTooLong { field: &'static str },

    #[error("{field} entries must be single-line values")]
    MultiLine { field: &'static str },

    #[error("{field} entries contain unsupported control characters")]
    ControlChars { field: &'static str },

    #[error("buildFlags values must not start with '!' command syntax")]
    CommandSyntax,
}

impl BuildOptions {
    pub fn is_empty(&self) -> bool {
        self.build_flags.is_empty() && self.lib_deps.is_empty()
    }

    /// Trim entries, drop empties, and enforce the item/length/charset caps.
    ///
    /// Idempotent: normalising an already-normalised value is a no-op.
    /// Values starting with `!` are rejected in `build_flags` because the
    /// underlying build tool treats them as dynamic shell commands.
    pub fn normalize(&self) -> Result<BuildOptions, OptionsError> {
        let build_flags = normalize_values("buildFlags", &self.build_flags)?;
        let lib_deps = normalize_values("libDeps", &self.lib_deps)?;

        if build_flags.iter().any(|flag| flag.starts_with('!')) {
            return Err(OptionsError::CommandSyntax);
        }

        Ok(BuildOptions { build_flags, lib_deps })
    }
}

fn normalize_values(field: &'static str, items: &[String]) -> Result<Vec<String>, OptionsError> {
    if items.len() > MAX_ITEMS {
        return Err(OptionsError::TooManyEntries { field });
    }

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        let value = item.trim();
        if value.is_empty() {
            continue;
        }
        if value.len() > MAX_ITEM_LEN {
            return Err(OptionsError::EntryTooLong { field });
        }
        if value.contains('\r') || value.contains('\n') {
            return Err(OptionsError::MultiLine { field });
        }
        if value.chars().any(|c| (c as u32) < 32 && c != '\t') {
            return Err(OptionsError::ControlChars { field });
        }
        result.push(value.to_string());
    }

    Ok(result)
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
