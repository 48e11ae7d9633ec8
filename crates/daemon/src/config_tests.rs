// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

/// Keys every test must leave unset.
const KEYS: &[&str] = &[
    "APP_PORT",
    "APP_WORKDIR",
    "APP_DOCKER_HOST_WORKDIR",
    "APP_DOCKER_HOST_CACHE_DIR",
    "APP_PLATFORMIO_CACHE_DIR",
    "APP_CONCURRENT_BUILDS",
    "APP_RETENTION_HOURS",
    "APP_BUILD_TIMEOUT_MINUTES",
    "APP_BUILDER_IMAGE",
    "APP_PLATFORMIO_JOBS",
    "APP_ALLOWED_ORIGINS",
    "APP_MAX_LOG_LINES",
    "APP_BUILD_RATE_LIMIT_PER_MINUTE",
    "APP_REQUIRE_CAPTCHA",
    "APP_TRUST_PROXY_HEADERS",
    "APP_FIRMWARE_EXTENSIONS",
    "APP_NODE_BASE_URL",
    "APP_PROXY_BACKEND_URLS",
    "APP_PROXY_TIMEOUT_SECONDS",
];

fn with_env<T>(pairs: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
    for key in KEYS {
        std::env::remove_var(key);
    }
    for (key, value) in pairs {
        std::env::set_var(key, value);
    }
    let result = body();
    for key in KEYS {
        std::env::remove_var(key);
    }
    result
}

#[test]
#[serial]
fn defaults_load_with_only_a_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let cfg = with_env(
        &[("APP_WORKDIR", work.to_str().unwrap())],
        Config::load,
    )
    .unwrap();

    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.concurrent_builds, 1);
    assert_eq!(cfg.retention, Duration::from_secs(168 * 3600));
    assert_eq!(cfg.build_timeout, Duration::from_secs(3600));
    assert_eq!(cfg.max_log_lines, 20_000);
    assert_eq!(cfg.build_rate_limit, 10);
    assert!(cfg.require_captcha);
    assert!(!cfg.trust_proxy_headers);
    assert_eq!(cfg.allowed_origins, vec!["http://localhost:5173"]);
    assert!(!cfg.federation_enabled());

    // The working tree was created.
    assert!(cfg.discovery_root.is_dir());
    assert!(cfg.jobs_root.is_dir());
    assert!(cfg.firmware_cache_root.is_dir());
    assert!(cfg.platformio_cache.is_dir());
}

#[test]
#[serial]
fn bounds_are_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_CONCURRENT_BUILDS", "0"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::BelowMinimum { key: "APP_CONCURRENT_BUILDS", min: 1 });

    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_MAX_LOG_LINES", "99"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::BelowMinimum { key: "APP_MAX_LOG_LINES", min: 100 });

    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_REQUIRE_CAPTCHA", "maybe"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::NotABoolean { key: "APP_REQUIRE_CAPTCHA" });

    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_PORT", "not-a-number"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::NotAnInteger { key: "APP_PORT" });
}

#[test]
#[serial]
fn docker_host_paths_must_be_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_DOCKER_HOST_WORKDIR", "relative/path"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::NotAbsolute { key: "APP_DOCKER_HOST_WORKDIR" });
}

#[test]
#[serial]
fn federation_urls_are_normalised_and_deduped() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let cfg = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_NODE_BASE_URL", "https://a.example.org/"),
            (
                "APP_PROXY_BACKEND_URLS",
                "https://a.example.org/, https://b.example.org, https://a.example.org",
            ),
        ],
        Config::load,
    )
    .unwrap();

    assert_eq!(cfg.node_base_url.as_deref(), Some("https://a.example.org"));
    assert_eq!(
        cfg.proxy_backend_urls,
        vec!["https://a.example.org", "https://b.example.org"]
    );
    assert!(cfg.federation_enabled());
}

#[test]
#[serial]
fn backend_urls_with_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let err = with_env(
        &[
            ("APP_WORKDIR", work.to_str().unwrap()),
            ("APP_PROXY_BACKEND_URLS", "https://a.example.org/api"),
        ],
        Config::load,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl { key: "APP_PROXY_BACKEND_URLS", .. }));
}

#[test]
fn normalize_base_url_rules() {
    assert_eq!(
        normalize_base_url("https://node.example.org/").unwrap(),
        "https://node.example.org"
    );
    assert_eq!(
        normalize_base_url("http://node.example.org:8080").unwrap(),
        "http://node.example.org:8080"
    );
    assert!(normalize_base_url("").is_err());
    assert!(normalize_base_url("ftp://node.example.org").is_err());
    assert!(normalize_base_url("https://node.example.org/path").is_err());
    assert!(normalize_base_url("https://node.example.org?q=1").is_err());
    assert!(normalize_base_url("https://node.example.org#frag").is_err());
}

#[test]
fn split_csv_trims_and_drops_empties() {
    assert_eq!(split_csv("a, b ,,c"), vec!["a", "b", "c"]);
    assert!(split_csv("  ").is_empty());
    assert!(split_csv("").is_empty());
}
