// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::captcha::CaptchaStore;
use crate::proxy::{PeerPool, PEER_COOLDOWN};
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::test_support::test_config;
use axum::body::to_bytes;
use mfb_core::{Job, SystemClock};
use serde_json::Value;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const REPO: &str = "https://github.com/example/firmware.git";

fn test_state(root: &FsPath, require_captcha: bool) -> AppState {
    let mut cfg = test_config(root);
    cfg.require_captcha = require_captcha;
    let registry = Registry::new(cfg.clone(), SystemClock);
    AppState {
        cfg: Arc::new(cfg.clone()),
        registry,
        captcha: Arc::new(CaptchaStore::new(SystemClock)),
        rate_limiter: Arc::new(RateLimiter::new(
            SystemClock,
            Duration::from_secs(60),
            cfg.build_rate_limit,
        )),
        peers: Arc::new(PeerPool::new(Vec::new(), PEER_COOLDOWN)),
        proxy_client: reqwest::Client::new(),
    }
}

fn ctx() -> RequestContext {
    RequestContext {
        request_id: "req-test".to_string(),
        client_host: "127.0.0.1".to_string(),
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_status_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let response = healthz(State(state.clone()), Extension(ctx())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let value = body_json(response).await;
    assert_eq!(value["data"]["status"], "ok");
    assert_eq!(value["data"]["runningBuilds"], 0);
    assert_eq!(value["data"]["queuedBuilds"], 0);
    // Federation is off: no peer block.
    assert!(value["data"].get("peers").is_none());

    state.registry.close().await;
}

#[tokio::test]
async fn captcha_endpoint_issues_a_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), true);

    let response = captcha(State(state.clone()), Extension(ctx())).await;
    let value = body_json(response).await;
    let id = value["data"]["captchaId"].as_str().unwrap();
    assert!(id.starts_with("cap-"));
    assert!(value["data"]["question"].as_str().unwrap().contains("= ?"));
    assert!(value["data"]["expiresAt"].is_string());

    state.registry.close().await;
}

#[tokio::test]
async fn malformed_json_is_an_invalid_request() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let response = repo_refs(
        State(state.clone()),
        Extension(ctx()),
        Bytes::from_static(b"{not json"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "INVALID_REQUEST");

    state.registry.close().await;
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}","surprise":true}}"#);
    let response = repo_refs(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    state.registry.close().await;
}

#[tokio::test]
async fn trailing_content_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}"}} {{}}"#);
    let response = repo_refs(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    state.registry.close().await;
}

#[tokio::test]
async fn refs_rejects_invalid_repo_url() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let response = repo_refs(
        State(state.clone()),
        Extension(ctx()),
        Bytes::from_static(br#"{"repoUrl":"file:///etc/passwd"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "INVALID_REQUEST");

    state.registry.close().await;
}

#[tokio::test]
async fn create_job_without_captcha_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}","ref":"main","device":"tbeam"}}"#);
    let response = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let value = body_json(response).await;
    assert_eq!(value["data"]["status"], "queued");
    assert_eq!(value["data"]["queuePosition"], 1);
    assert_eq!(value["data"]["device"], "tbeam");
    assert!(value["data"].get("captchaSessionToken").is_none());
    assert!(value["data"].get("startedAt").is_none());

    state.registry.close().await;
}

#[tokio::test]
async fn create_job_requires_captcha_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), true);

    let body = format!(r#"{{"repoUrl":"{REPO}","device":"tbeam"}}"#);
    let response = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "INVALID_CAPTCHA");

    state.registry.close().await;
}

#[tokio::test]
async fn create_job_rejects_bad_session_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), true);

    let body = format!(
        r#"{{"repoUrl":"{REPO}","device":"tbeam","captchaSessionToken":"ses-unknown"}}"#
    );
    let response = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "CAPTCHA_SESSION_FAILED");

    state.registry.close().await;
}

#[tokio::test]
async fn create_job_maps_validation_to_invalid_job() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}","device":"../escape"}}"#);
    let response = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "INVALID_JOB");

    state.registry.close().await;
}

#[tokio::test]
async fn create_job_is_rate_limited_per_host() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.require_captcha = false;
    cfg.build_rate_limit = 2;
    let registry = Registry::new(cfg.clone(), SystemClock);
    let state = AppState {
        cfg: Arc::new(cfg.clone()),
        registry,
        captcha: Arc::new(CaptchaStore::new(SystemClock)),
        rate_limiter: Arc::new(RateLimiter::new(SystemClock, Duration::from_secs(60), 2)),
        peers: Arc::new(PeerPool::new(Vec::new(), PEER_COOLDOWN)),
        proxy_client: reqwest::Client::new(),
    };

    let body = || {
        Bytes::from(format!(
            r#"{{"repoUrl":"{REPO}","device":"tbeam"}}"#
        ))
    };
    for _ in 0..2 {
        let response = create_job(State(state.clone()), Extension(ctx()), body()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = create_job(State(state.clone()), Extension(ctx()), body()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "RATE_LIMITED");

    state.registry.close().await;
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let response =
        get_job(State(state.clone()), Extension(ctx()), Path("job-missing".to_string())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "JOB_NOT_FOUND");

    state.registry.close().await;
}

#[tokio::test]
async fn artifact_download_sets_attachment_disposition() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::write(out_dir.join("firmware.bin"), b"firmware-bytes").unwrap();

    let mut artifacts = vec![Artifact::new(
        "firmware.bin",
        "firmware.bin",
        14,
        out_dir.join("firmware.bin"),
    )];
    Artifact::assign_ids(&mut artifacts);

    let job = Arc::new(Job::new(
        JobId::from_string("job-artifact"),
        REPO,
        "main",
        "tbeam",
        BuildOptions::default(),
        PathBuf::from(dir.path()).join("jobs/job-artifact"),
        Utc::now(),
    ));
    job.mark_running(Utc::now());
    job.mark_success(Utc::now(), artifacts);
    state.registry.insert_test_job(job, false);

    let response = download_artifact(
        State(state.clone()),
        Extension(ctx()),
        Path(("job-artifact".to_string(), "1".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"firmware.bin\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "14");
    let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"firmware-bytes");

    state.registry.close().await;
}

#[tokio::test]
async fn unknown_artifact_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}","device":"tbeam"}}"#);
    let created = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    let created = body_json(created).await;
    let job_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = download_artifact(
        State(state.clone()),
        Extension(ctx()),
        Path((job_id, "1".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "ARTIFACT_NOT_FOUND");

    state.registry.close().await;
}

#[tokio::test]
async fn logs_endpoint_returns_recorded_lines() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), false);

    let body = format!(r#"{{"repoUrl":"{REPO}","device":"tbeam"}}"#);
    let created = create_job(State(state.clone()), Extension(ctx()), Bytes::from(body)).await;
    let created = body_json(created).await;
    let job_id = created["data"]["id"].as_str().unwrap().to_string();

    let job = state.registry.job_handle(&job_id).unwrap();
    job.append_log(100, "line one");
    job.append_log(100, "line two");

    let response = get_logs(State(state.clone()), Extension(ctx()), Path(job_id)).await;
    let value = body_json(response).await;
    assert_eq!(value["data"]["lines"], serde_json::json!(["line one", "line two"]));

    state.registry.close().await;
}

#[tokio::test]
async fn fallback_returns_not_found_envelope() {
    let response = not_found(Extension(ctx())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let value = body_json(response).await;
    assert_eq!(value["error"]["code"], "NOT_FOUND");
}
