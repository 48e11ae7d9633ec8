// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON response envelopes and stable error codes.
//!
//! Every JSON response is `{data, meta}` or `{error, meta}`, with the
//! request ID and a UTC timestamp in `meta`. Error codes are part of the
//! API contract and never change spelling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

pub(crate) mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INVALID_CAPTCHA: &str = "INVALID_CAPTCHA";
    pub const CAPTCHA_SESSION_FAILED: &str = "CAPTCHA_SESSION_FAILED";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INVALID_JOB: &str = "INVALID_JOB";
    pub const DISCOVERY_FAILED: &str = "DISCOVERY_FAILED";
    pub const REFS_DISCOVERY_FAILED: &str = "REFS_DISCOVERY_FAILED";
    pub const JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
    pub const ARTIFACT_NOT_FOUND: &str = "ARTIFACT_NOT_FOUND";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const BUSY: &str = "BUSY";
    pub const PROXY_TARGET_INVALID: &str = "PROXY_TARGET_INVALID";
    pub const PROXY_TARGET_NOT_ALLOWED: &str = "PROXY_TARGET_NOT_ALLOWED";
    pub const PROXY_TARGET_UNAVAILABLE: &str = "PROXY_TARGET_UNAVAILABLE";
    pub const ORIGIN_NOT_ALLOWED: &str = "ORIGIN_NOT_ALLOWED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

fn meta(request_id: &str) -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "requestId": request_id,
    })
}

/// `{data, meta}` with the given status.
pub(crate) fn success(status: StatusCode, request_id: &str, data: impl Serialize) -> Response {
    let data = match serde_json::to_value(data) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialise response data");
            return error(
                StatusCode::INTERNAL_SERVER_ERROR,
                request_id,
                codes::INTERNAL_ERROR,
                "internal error",
            );
        }
    };
    (status, Json(json!({ "data": data, "meta": meta(request_id) }))).into_response()
}

/// `{error: {code, message, details: null}, meta}` with the given status.
pub(crate) fn error(
    status: StatusCode,
    request_id: &str,
    code: &str,
    message: &str,
) -> Response {
    let body = json!({
        "error": { "code": code, "message": message, "details": Value::Null },
        "meta": meta(request_id),
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
