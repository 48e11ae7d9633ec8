// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route handlers for the JSON API.

use super::envelope::{codes, error, success};
use super::{AppState, RequestContext};
use crate::registry::RegistryError;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Extension;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mfb_core::{Artifact, BuildOptions, JobId, JobState, Status};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RefsRequest {
    repo_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DiscoverRequest {
    repo_url: String,
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    captcha_id: String,
    #[serde(default)]
    captcha_answer: String,
    #[serde(default)]
    captcha_session_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateJobRequest {
    repo_url: String,
    #[serde(rename = "ref", default)]
    git_ref: String,
    device: String,
    #[serde(default)]
    build_flags: Vec<String>,
    #[serde(default)]
    lib_deps: Vec<String>,
    #[serde(default)]
    captcha_id: String,
    #[serde(default)]
    captcha_answer: String,
    #[serde(default)]
    captcha_session_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactView {
    id: String,
    name: String,
    relative_path: String,
    size: u64,
    download_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    id: JobId,
    repo_url: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    git_ref: String,
    device: String,
    status: Status,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
    log_lines: usize,
    artifacts: Vec<ArtifactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    captcha_session_token: Option<String>,
}

fn artifact_views(job_id: &JobId, artifacts: &[Artifact]) -> Vec<ArtifactView> {
    artifacts
        .iter()
        .map(|artifact| ArtifactView {
            id: artifact.id.clone(),
            name: artifact.name.clone(),
            relative_path: artifact.relative_path.clone(),
            size: artifact.size,
            download_url: format!("/api/jobs/{}/artifacts/{}", job_id, artifact.id),
        })
        .collect()
}

fn job_view(state: JobState, captcha_session_token: Option<String>) -> JobView {
    let artifacts = artifact_views(&state.id, &state.artifacts);
    JobView {
        id: state.id,
        repo_url: state.repo_url,
        git_ref: state.git_ref,
        device: state.device,
        status: state.status,
        created_at: state.created_at,
        started_at: state.started_at,
        finished_at: state.finished_at,
        error: state.error,
        log_lines: state.log_lines,
        artifacts,
        queue_position: state.queue_position,
        queue_eta_seconds: state.queue_eta_seconds,
        captcha_session_token,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub(crate) async fn healthz(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let load = state.registry.load();
    let mut data = json!({
        "status": "ok",
        "runningBuilds": load.running_builds,
        "queuedBuilds": load.queued_builds,
        "concurrentBuilds": load.concurrent_builds,
    });

    if state.cfg.federation_enabled() {
        if let Some(node) = &state.cfg.node_base_url {
            data["node"] = json!(node);
        }
        data["peers"] = json!(state.peers.snapshot());
    }

    success(StatusCode::OK, &ctx.request_id, data)
}

pub(crate) async fn captcha(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let challenge = state.captcha.issue(&ctx.client_host);
    success(
        StatusCode::OK,
        &ctx.request_id,
        json!({
            "captchaId": challenge.id,
            "question": challenge.question,
            "expiresAt": challenge.expires_at,
        }),
    )
}

pub(crate) async fn repo_refs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let request: RefsRequest = match decode_json(&body) {
        Ok(request) => request,
        Err(message) => {
            return error(StatusCode::BAD_REQUEST, &ctx.request_id, codes::INVALID_REQUEST, &message)
        }
    };

    if let Err(err) = mfb_core::validate_repo_url(&request.repo_url) {
        return error(
            StatusCode::BAD_REQUEST,
            &ctx.request_id,
            codes::INVALID_REQUEST,
            &err.to_string(),
        );
    }

    match mfb_engine::refs::discover_refs(
        &state.cfg.discovery_root,
        request.repo_url.trim(),
        &CancellationToken::new(),
    )
    .await
    {
        Ok(refs) => success(StatusCode::OK, &ctx.request_id, refs),
        Err(err) => error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &ctx.request_id,
            codes::REFS_DISCOVERY_FAILED,
            &err.to_string(),
        ),
    }
}

pub(crate) async fn discover(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let request: DiscoverRequest = match decode_json(&body) {
        Ok(request) => request,
        Err(message) => {
            return error(StatusCode::BAD_REQUEST, &ctx.request_id, codes::INVALID_REQUEST, &message)
        }
    };

    let session_token = match verify_captcha(
        &state,
        &ctx,
        &request.captcha_id,
        &request.captcha_answer,
        &request.captcha_session_token,
    ) {
        Ok(token) => token,
        Err(response) => return response,
    };

    if let Err(err) = mfb_core::validate_repo_url(&request.repo_url) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &ctx.request_id,
            codes::DISCOVERY_FAILED,
            &err.to_string(),
        );
    }
    if let Err(err) = mfb_core::validate_ref(&request.git_ref) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &ctx.request_id,
            codes::DISCOVERY_FAILED,
            &err.to_string(),
        );
    }

    match mfb_engine::discovery::discover_devices(
        &state.cfg.discovery_root,
        request.repo_url.trim(),
        request.git_ref.trim(),
        &CancellationToken::new(),
    )
    .await
    {
        Ok(devices) => {
            let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
            let mut data = json!({
                "repoUrl": request.repo_url,
                "devices": names,
            });
            if !request.git_ref.trim().is_empty() {
                data["ref"] = json!(request.git_ref.trim());
            }
            if let Some(token) = session_token {
                data["captchaSessionToken"] = json!(token);
            }
            success(StatusCode::OK, &ctx.request_id, data)
        }
        Err(err) => error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &ctx.request_id,
            codes::DISCOVERY_FAILED,
            &err.to_string(),
        ),
    }
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let request: CreateJobRequest = match decode_json(&body) {
        Ok(request) => request,
        Err(message) => {
            return error(StatusCode::BAD_REQUEST, &ctx.request_id, codes::INVALID_REQUEST, &message)
        }
    };

    let session_token = match verify_captcha(
        &state,
        &ctx,
        &request.captcha_id,
        &request.captcha_answer,
        &request.captcha_session_token,
    ) {
        Ok(token) => token,
        Err(response) => return response,
    };

    if !state.rate_limiter.allow(&ctx.client_host) {
        return error(
            StatusCode::TOO_MANY_REQUESTS,
            &ctx.request_id,
            codes::RATE_LIMITED,
            "too many build requests from this client",
        );
    }

    let options = BuildOptions {
        build_flags: request.build_flags,
        lib_deps: request.lib_deps,
    };
    match state
        .registry
        .create(&request.repo_url, &request.git_ref, &request.device, options)
    {
        Ok(job) => success(StatusCode::CREATED, &ctx.request_id, job_view(job, session_token)),
        Err(err) => registry_error_response(&ctx, err),
    }
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id) {
        Ok(job) => success(StatusCode::OK, &ctx.request_id, job_view(job, None)),
        Err(err) => registry_error_response(&ctx, err),
    }
}

pub(crate) async fn get_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.logs(&id) {
        Ok(lines) => success(StatusCode::OK, &ctx.request_id, json!({ "lines": lines })),
        Err(err) => registry_error_response(&ctx, err),
    }
}

pub(crate) async fn list_artifacts(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id) {
        Ok(job) => success(
            StatusCode::OK,
            &ctx.request_id,
            json!({ "artifacts": artifact_views(&job.id, &job.artifacts) }),
        ),
        Err(err) => registry_error_response(&ctx, err),
    }
}

pub(crate) async fn download_artifact(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, artifact_id)): Path<(String, String)>,
) -> Response {
    let artifact = match state.registry.artifact(&id, &artifact_id) {
        Ok(artifact) => artifact,
        Err(err) => return registry_error_response(&ctx, err),
    };

    let file = match tokio::fs::File::open(artifact.absolute_path()).await {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(
                job_id = %id,
                artifact_id = %artifact_id,
                error = %err,
                "artifact file unreadable"
            );
            return error(
                StatusCode::NOT_FOUND,
                &ctx.request_id,
                codes::ARTIFACT_NOT_FOUND,
                "artifact not found",
            );
        }
    };

    // The name is a basename by construction; the quoted form keeps
    // browsers from mangling dots.
    let disposition = format!("attachment; filename=\"{}\"", artifact.name);
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.size));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

pub(crate) async fn not_found(Extension(ctx): Extension<RequestContext>) -> Response {
    error(StatusCode::NOT_FOUND, &ctx.request_id, codes::NOT_FOUND, "route not found")
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Decode a request body as exactly one JSON object with known fields.
fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|err| format!("invalid request body: {}", err))
}

/// Enforce the captcha policy for a mutating request.
///
/// A presented session token is redeemed (sliding TTL); otherwise the
/// challenge answer must verify, which issues a fresh token. Any failure
/// on a request that carried a token also invalidates that token.
fn verify_captcha(
    state: &AppState,
    ctx: &RequestContext,
    captcha_id: &str,
    captcha_answer: &str,
    session_token: &str,
) -> Result<Option<String>, Response> {
    if !state.cfg.require_captcha {
        return Ok(None);
    }

    let token = session_token.trim();
    if !token.is_empty() {
        return match state.captcha.redeem_session(&ctx.client_host, token) {
            Ok(()) => Ok(Some(token.to_string())),
            Err(err) => {
                state.captcha.drop_session(token);
                Err(error(
                    StatusCode::FORBIDDEN,
                    &ctx.request_id,
                    codes::CAPTCHA_SESSION_FAILED,
                    &err.to_string(),
                ))
            }
        };
    }

    match state.captcha.validate(&ctx.client_host, captcha_id, captcha_answer) {
        Ok(token) => Ok(Some(token.to_string())),
        Err(err) => Err(error(
            StatusCode::FORBIDDEN,
            &ctx.request_id,
            codes::INVALID_CAPTCHA,
            &err.to_string(),
        )),
    }
}

pub(crate) fn registry_error_response(ctx: &RequestContext, err: RegistryError) -> Response {
    let message = err.to_string();
    match err {
        RegistryError::Validate(_) | RegistryError::Options(_) => {
            error(StatusCode::BAD_REQUEST, &ctx.request_id, codes::INVALID_JOB, &message)
        }
        RegistryError::JobNotFound => {
            error(StatusCode::NOT_FOUND, &ctx.request_id, codes::JOB_NOT_FOUND, &message)
        }
        RegistryError::ArtifactNotFound => {
            error(StatusCode::NOT_FOUND, &ctx.request_id, codes::ARTIFACT_NOT_FOUND, &message)
        }
        RegistryError::Busy | RegistryError::ShuttingDown => {
            error(StatusCode::SERVICE_UNAVAILABLE, &ctx.request_id, codes::BUSY, &message)
        }
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
