// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exact-origin CORS. No wildcards; requests without an `Origin` header
//! pass through untouched (curl and peers are not browsers).

use super::envelope::{self, codes};
use super::{AppState, RequestContext};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub(crate) async fn cors(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    if origin.is_empty() {
        if req.method() == Method::OPTIONS {
            return StatusCode::NO_CONTENT.into_response();
        }
        return next.run(req).await;
    }

    if !state.cfg.allowed_origins.iter().any(|allowed| *allowed == origin) {
        let request_id = req
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_default();
        return envelope::error(
            StatusCode::FORBIDDEN,
            &request_id,
            codes::ORIGIN_NOT_ALLOWED,
            "origin is not allowed",
        );
    }

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-MFB-Target-Backend"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("600"),
    );
    response
}
