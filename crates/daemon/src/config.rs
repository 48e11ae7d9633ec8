// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-driven configuration.
//!
//! Everything is read once at startup; a bad value is a fatal error.
//! Only the process environment is global; every other piece of state
//! lives in an explicit component.

use mfb_engine::artifacts::DEFAULT_FIRMWARE_EXTENSIONS;
use mfb_engine::runner::BuilderConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WORK_DIR: &str = "../build-workdir";
const DEFAULT_CONCURRENT_BUILDS: usize = 1;
const DEFAULT_RETENTION_HOURS: u64 = 168;
const DEFAULT_BUILD_TIMEOUT_MINUTES: u64 = 60;
const DEFAULT_BUILDER_IMAGE: &str = "mfb-pio-builder:latest";
const DEFAULT_PLATFORMIO_JOBS: u32 = 1;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173";
const DEFAULT_MAX_LOG_LINES: usize = 20_000;
const DEFAULT_BUILD_RATE_LIMIT: usize = 10;
const DEFAULT_REQUIRE_CAPTCHA: bool = true;
const DEFAULT_PROXY_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be an integer")]
    NotAnInteger { key: &'static str },

    #[error("{key} must be a boolean")]
    NotABoolean { key: &'static str },

    #[error("{key} must be >= {min}")]
    BelowMinimum { key: &'static str, min: i64 },

    #[error("{key} must be a valid TCP port")]
    NotAPort { key: &'static str },

    #[error("{key} must be an absolute path")]
    NotAbsolute { key: &'static str },

    #[error("{key}: {reason}")]
    InvalidUrl { key: &'static str, reason: String },

    #[error("resolve {key}: {reason}")]
    Resolve { key: &'static str, reason: String },

    #[error("create directory {path}: {reason}")]
    CreateDir { path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub work_dir: PathBuf,
    pub docker_host_work_dir: Option<PathBuf>,
    pub concurrent_builds: usize,
    pub retention: Duration,
    pub build_timeout: Duration,
    pub builder_image: String,
    pub platformio_jobs: u32,
    pub allowed_origins: Vec<String>,
    pub platformio_cache: PathBuf,
    pub docker_host_cache: Option<PathBuf>,
    pub max_log_lines: usize,
    pub build_rate_limit: usize,
    pub require_captcha: bool,
    pub trust_proxy_headers: bool,
    pub cleanup_interval: Duration,
    pub discovery_root: PathBuf,
    pub jobs_root: PathBuf,
    pub firmware_cache_root: PathBuf,
    pub firmware_extensions: Vec<String>,
    pub node_base_url: Option<String>,
    pub proxy_backend_urls: Vec<String>,
    pub proxy_timeout: Duration,
}

impl Config {
    /// Load configuration from `APP_*` environment variables.
    ///
    /// Creates the working directories as a side effect so every later
    /// component can assume they exist.
    pub fn load() -> Result<Config, ConfigError> {
        let port = int_env("APP_PORT", i64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::NotAPort { key: "APP_PORT" })?;

        let concurrent_builds =
            bounded_env("APP_CONCURRENT_BUILDS", DEFAULT_CONCURRENT_BUILDS as i64, 1)? as usize;
        let retention_hours =
            bounded_env("APP_RETENTION_HOURS", DEFAULT_RETENTION_HOURS as i64, 1)? as u64;
        let build_timeout_minutes =
            bounded_env("APP_BUILD_TIMEOUT_MINUTES", DEFAULT_BUILD_TIMEOUT_MINUTES as i64, 1)?
                as u64;
        let platformio_jobs =
            bounded_env("APP_PLATFORMIO_JOBS", i64::from(DEFAULT_PLATFORMIO_JOBS), 1)? as u32;
        let max_log_lines =
            bounded_env("APP_MAX_LOG_LINES", DEFAULT_MAX_LOG_LINES as i64, 100)? as usize;
        let build_rate_limit = bounded_env(
            "APP_BUILD_RATE_LIMIT_PER_MINUTE",
            DEFAULT_BUILD_RATE_LIMIT as i64,
            1,
        )? as usize;

        let require_captcha = bool_env("APP_REQUIRE_CAPTCHA", DEFAULT_REQUIRE_CAPTCHA)?;
        let trust_proxy_headers = bool_env("APP_TRUST_PROXY_HEADERS", false)?;

        let work_dir_raw = env_or("APP_WORKDIR", DEFAULT_WORK_DIR);
        let work_dir = std::path::absolute(&work_dir_raw).map_err(|e| ConfigError::Resolve {
            key: "APP_WORKDIR",
            reason: e.to_string(),
        })?;

        let discovery_root = work_dir.join("discovery");
        let jobs_root = work_dir.join("jobs");
        let firmware_cache_root = work_dir.join("firmware-cache");

        let platformio_cache = match env_opt("APP_PLATFORMIO_CACHE_DIR") {
            Some(raw) => std::path::absolute(&raw).map_err(|e| ConfigError::Resolve {
                key: "APP_PLATFORMIO_CACHE_DIR",
                reason: e.to_string(),
            })?,
            None => work_dir.join("platformio-cache"),
        };

        let docker_host_work_dir = abs_path_env("APP_DOCKER_HOST_WORKDIR")?;
        let docker_host_cache = abs_path_env("APP_DOCKER_HOST_CACHE_DIR")?;

        for dir in [&discovery_root, &jobs_root, &platformio_cache, &firmware_cache_root] {
            ensure_dir(dir)?;
        }

        let builder_image = env_or("APP_BUILDER_IMAGE", DEFAULT_BUILDER_IMAGE);

        let mut allowed_origins = split_csv(&std::env::var("APP_ALLOWED_ORIGINS").unwrap_or_default());
        if allowed_origins.is_empty() {
            allowed_origins = split_csv(DEFAULT_ALLOWED_ORIGINS);
        }

        let firmware_extensions = match env_opt("APP_FIRMWARE_EXTENSIONS") {
            Some(raw) => split_csv(&raw),
            None => DEFAULT_FIRMWARE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        };

        let node_base_url = match env_opt("APP_NODE_BASE_URL") {
            Some(raw) => Some(normalize_base_url(&raw).map_err(|reason| {
                ConfigError::InvalidUrl { key: "APP_NODE_BASE_URL", reason }
            })?),
            None => None,
        };

        let mut proxy_backend_urls = Vec::new();
        for raw in split_csv(&std::env::var("APP_PROXY_BACKEND_URLS").unwrap_or_default()) {
            let normalized = normalize_base_url(&raw).map_err(|reason| {
                ConfigError::InvalidUrl { key: "APP_PROXY_BACKEND_URLS", reason }
            })?;
            if !proxy_backend_urls.contains(&normalized) {
                proxy_backend_urls.push(normalized);
            }
        }

        let proxy_timeout_seconds =
            bounded_env("APP_PROXY_TIMEOUT_SECONDS", DEFAULT_PROXY_TIMEOUT_SECONDS as i64, 1)?
                as u64;

        Ok(Config {
            port,
            work_dir,
            docker_host_work_dir,
            concurrent_builds,
            retention: Duration::from_secs(retention_hours * 3600),
            build_timeout: Duration::from_secs(build_timeout_minutes * 60),
            builder_image,
            platformio_jobs,
            allowed_origins,
            platformio_cache,
            docker_host_cache,
            max_log_lines,
            build_rate_limit,
            require_captcha,
            trust_proxy_headers,
            cleanup_interval: Duration::from_secs(3600),
            discovery_root,
            jobs_root,
            firmware_cache_root,
            firmware_extensions,
            node_base_url,
            proxy_backend_urls,
            proxy_timeout: Duration::from_secs(proxy_timeout_seconds),
        })
    }

    /// Federation is on when this node knows itself or any peers.
    pub fn federation_enabled(&self) -> bool {
        self.node_base_url.is_some() || !self.proxy_backend_urls.is_empty()
    }

    /// The slice of configuration the container runner needs.
    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            image: self.builder_image.clone(),
            platformio_jobs: self.platformio_jobs,
            work_dir: self.work_dir.clone(),
            docker_host_work_dir: self.docker_host_work_dir.clone(),
            platformio_cache: self.platformio_cache.clone(),
            docker_host_cache: self.docker_host_cache.clone(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or(key: &str, fallback: &str) -> String {
    env_opt(key).unwrap_or_else(|| fallback.to_string())
}

fn int_env(key: &'static str, fallback: i64) -> Result<i64, ConfigError> {
    match env_opt(key) {
        None => Ok(fallback),
        Some(raw) => raw.parse().map_err(|_| ConfigError::NotAnInteger { key }),
    }
}

fn bounded_env(key: &'static str, fallback: i64, min: i64) -> Result<i64, ConfigError> {
    let value = int_env(key, fallback)?;
    if value < min {
        return Err(ConfigError::BelowMinimum { key, min });
    }
    Ok(value)
}

fn bool_env(key: &'static str, fallback: bool) -> Result<bool, ConfigError> {
    match env_opt(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(fallback),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::NotABoolean { key }),
        },
    }
}

fn abs_path_env(key: &'static str) -> Result<Option<PathBuf>, ConfigError> {
    let Some(raw) = env_opt(key) else {
        return Ok(None);
    };
    let path = PathBuf::from(&raw);
    if !path.is_absolute() {
        return Err(ConfigError::NotAbsolute { key });
    }
    Ok(Some(path))
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

/// Normalise a federation base URL: http(s), host required, no path,
/// query, or fragment; no trailing slash.
pub(crate) fn normalize_base_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }

    let parsed = Url::parse(trimmed).map_err(|e| format!("invalid URL: {}", e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("URL scheme must be http or https".to_string());
    }
    if parsed.host_str().unwrap_or("").is_empty() {
        return Err("URL host is required".to_string());
    }
    if !parsed.path().is_empty() && parsed.path() != "/" {
        return Err("URL must not contain a path".to_string());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err("URL must not contain query or fragment".to_string());
    }

    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

fn ensure_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|e| ConfigError::CreateDir {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
