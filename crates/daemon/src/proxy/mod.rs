// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Federation: transparent proxying between peer control planes.
//!
//! A request may pin a target backend via header or query parameter. If
//! the target is this node (or unset) it is handled locally; otherwise it
//! must be in the configured peer pool and is forwarded with cleaned
//! headers and a streamed body, so SSE passes through unbuffered.

mod peers;

pub use peers::{PeerHealth, PeerPool};

use crate::config;
use crate::http::envelope::{codes, error};
use crate::http::{AppState, RequestContext, BODY_LIMIT};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use futures::TryStreamExt;
use std::time::Duration;

pub(crate) const TARGET_HEADER: &str = "x-mfb-target-backend";
pub(crate) const SERVED_BY_HEADER: &str = "x-mfb-served-by";
pub(crate) const PROXIED_VIA_HEADER: &str = "x-mfb-proxied-via";
pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";
pub(crate) const TARGET_QUERY_PARAM: &str = "__mfb_target_backend";

/// How long a failed peer is advertised as unavailable.
pub const PEER_COOLDOWN: Duration = Duration::from_secs(15);

/// How long to wait for a peer's response headers.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Hop-by-hop headers (RFC 9110 §7.6.1) plus connection management
/// headers the proxy must own.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Middleware dispatching each request locally or to its target backend.
pub(crate) async fn federation(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let Some(raw_target) = extract_target(&req) else {
        return local(&state, req, next).await;
    };

    let target = match config::normalize_base_url(&raw_target) {
        Ok(target) => target,
        Err(reason) => {
            return error(
                StatusCode::BAD_REQUEST,
                &request_id,
                codes::PROXY_TARGET_INVALID,
                &format!("target backend is invalid: {}", reason),
            )
        }
    };

    if state.cfg.node_base_url.as_deref() == Some(target.as_str()) {
        return local(&state, req, next).await;
    }

    if !state.peers.contains(&target) {
        return error(
            StatusCode::FORBIDDEN,
            &request_id,
            codes::PROXY_TARGET_NOT_ALLOWED,
            "target backend is not in the configured pool",
        );
    }

    forward(&state, req, &target, &request_id).await
}

/// Handle locally, then sign the response when federation is enabled.
async fn local(state: &AppState, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if state.cfg.federation_enabled() {
        if let Some(node) = &state.cfg.node_base_url {
            if !response.headers().contains_key(SERVED_BY_HEADER) {
                if let Ok(value) = HeaderValue::from_str(node) {
                    response.headers_mut().insert(SERVED_BY_HEADER, value);
                }
            }
        }
    }
    response
}

/// The pinned target backend, from header or query parameter.
fn extract_target(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(TARGET_HEADER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Rebuild the query string without the routing parameter.
fn clean_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == TARGET_QUERY_PARAM {
            continue;
        }
        serializer.append_pair(&key, &value);
        any = true;
    }
    if !any {
        return None;
    }
    Some(serializer.finish())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

async fn forward(
    state: &AppState,
    req: Request,
    target: &str,
    request_id: &str,
) -> Response {
    let (parts, body) = req.into_parts();

    let body = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error(
                StatusCode::BAD_REQUEST,
                request_id,
                codes::INVALID_REQUEST,
                "request body too large",
            )
        }
    };

    let mut upstream_url = format!("{}{}", target, parts.uri.path());
    if let Some(query) = clean_query(parts.uri.query()) {
        upstream_url.push('?');
        upstream_url.push_str(&query);
    }

    let mut headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name)
            || name.as_str() == TARGET_HEADER
            || name == axum::http::header::ORIGIN
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Some(node) = &state.cfg.node_base_url {
        if let Ok(value) = HeaderValue::from_str(node) {
            headers.insert(PROXIED_VIA_HEADER, value);
        }
    }

    let upstream_request = state
        .proxy_client
        .request(parts.method.clone(), &upstream_url)
        .headers(headers)
        .body(body);

    // The deadline covers connect + response headers only; streaming
    // bodies (SSE in particular) run as long as both sides stay open.
    let sent = tokio::time::timeout(state.cfg.proxy_timeout, upstream_request.send()).await;
    let upstream = match sent {
        Err(_elapsed) => {
            state.peers.mark_unavailable(target, Utc::now());
            return error(
                StatusCode::BAD_GATEWAY,
                request_id,
                codes::PROXY_TARGET_UNAVAILABLE,
                "target backend did not respond in time",
            );
        }
        Ok(Err(err)) => {
            state.peers.mark_unavailable(target, Utc::now());
            tracing::warn!(target, error = %err, "proxy transport failure");
            return error(
                StatusCode::BAD_GATEWAY,
                request_id,
                codes::PROXY_TARGET_UNAVAILABLE,
                "target backend is unavailable",
            );
        }
        Ok(Ok(response)) => response,
    };

    let status = upstream.status();
    if matches!(status.as_u16(), 502 | 503 | 504) {
        state.peers.mark_unavailable(target, Utc::now());
    }

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    if !response_headers.contains_key(SERVED_BY_HEADER) {
        if let Ok(value) = HeaderValue::from_str(target) {
            response_headers.insert(SERVED_BY_HEADER, value);
        }
    }
    if let Some(node) = &state.cfg.node_base_url {
        if let Ok(value) = HeaderValue::from_str(node) {
            response_headers.insert(PROXIED_VIA_HEADER, value);
        }
    }

    // Chunk-by-chunk pass-through; hyper flushes each frame, so SSE is
    // never buffered here.
    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Background probe keeping peer health and load scores current.
pub async fn probe_loop(state: AppState) {
    let shutdown = state.registry.shutdown_token();
    let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => probe_all(&state).await,
        }
    }
}

async fn probe_all(state: &AppState) {
    for peer in state.peers.urls() {
        let healthz = format!("{}/api/healthz", peer);
        let result =
            tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.proxy_client.get(&healthz).send())
                .await;

        let now = Utc::now();
        match result {
            Ok(Ok(response)) if response.status().is_success() => {
                let load = parse_load_score(response.json().await.ok());
                state.peers.mark_probe(peer, true, load, now);
            }
            _ => state.peers.mark_probe(peer, false, None, now),
        }
    }
}

/// `runningBuilds/concurrency + queuedBuilds/concurrency` from a peer's
/// health envelope.
fn parse_load_score(body: Option<serde_json::Value>) -> Option<f64> {
    let data = body?.get("data")?.clone();
    let running = data.get("runningBuilds")?.as_f64()?;
    let queued = data.get("queuedBuilds")?.as_f64()?;
    let concurrency = data.get("concurrentBuilds")?.as_f64()?;
    if concurrency <= 0.0 {
        return None;
    }
    Some(running / concurrency + queued / concurrency)
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
