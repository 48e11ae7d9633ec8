// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests.

use crate::config::Config;
use std::path::Path;
use std::time::Duration;

/// A config rooted in a temp directory, with no workers by default so
/// queue state stays observable. Tests override fields as needed.
pub(crate) fn test_config(root: &Path) -> Config {
    let work_dir = root.to_path_buf();
    Config {
        port: 0,
        work_dir: work_dir.clone(),
        docker_host_work_dir: None,
        concurrent_builds: 0,
        retention: Duration::from_secs(168 * 3600),
        build_timeout: Duration::from_secs(20 * 60),
        builder_image: "mfb-pio-builder:latest".to_string(),
        platformio_jobs: 1,
        allowed_origins: vec!["http://localhost:5173".to_string()],
        platformio_cache: work_dir.join("platformio-cache"),
        docker_host_cache: None,
        max_log_lines: 200,
        build_rate_limit: 10,
        require_captcha: true,
        trust_proxy_headers: false,
        cleanup_interval: Duration::from_secs(3600),
        discovery_root: work_dir.join("discovery"),
        jobs_root: work_dir.join("jobs"),
        firmware_cache_root: work_dir.join("firmware-cache"),
        firmware_extensions: mfb_engine::artifacts::DEFAULT_FIRMWARE_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        node_base_url: None,
        proxy_backend_urls: Vec::new(),
        proxy_timeout: Duration::from_secs(10),
    }
}
