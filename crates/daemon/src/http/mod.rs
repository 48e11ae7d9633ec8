// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: routing, shared state, and request context.

pub(crate) mod cors;
pub(crate) mod envelope;
pub(crate) mod handlers;
pub(crate) mod sse;

use crate::captcha::CaptchaStore;
use crate::config::Config;
use crate::proxy::{self, PeerPool};
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request body cap for the JSON endpoints.
pub const BODY_LIMIT: usize = 1024 * 1024;

const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

mfb_core::define_id! {
    /// Per-request correlation ID, echoed in `meta` and `X-Request-ID`.
    pub struct RequestId("req-");
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub registry: Registry,
    pub captcha: Arc<CaptchaStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub peers: Arc<PeerPool>,
    pub proxy_client: reqwest::Client,
}

impl AppState {
    /// Wire up all components from configuration. Starts the registry's
    /// worker pool; the caller owns shutdown via `registry.close()`.
    pub fn new(cfg: Config) -> anyhow::Result<AppState> {
        use mfb_core::SystemClock;

        let registry = Registry::new(cfg.clone(), SystemClock);
        let captcha = Arc::new(CaptchaStore::new(SystemClock));
        let rate_limiter = Arc::new(RateLimiter::new(
            SystemClock,
            std::time::Duration::from_secs(60),
            cfg.build_rate_limit,
        ));
        let peers = Arc::new(PeerPool::new(
            cfg.proxy_backend_urls.clone(),
            proxy::PEER_COOLDOWN,
        ));
        let proxy_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(AppState {
            cfg: Arc::new(cfg),
            registry,
            captcha,
            rate_limiter,
            peers,
            proxy_client,
        })
    }
}

/// Identity of one request: correlation ID plus the derived client host.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_host: String,
}

/// Build the full router with middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/healthz", get(handlers::healthz))
        .route("/api/captcha", get(handlers::captcha))
        .route("/api/repos/refs", post(handlers::repo_refs))
        .route("/api/repos/discover", post(handlers::discover))
        .route("/api/jobs", post(handlers::create_job))
        .route("/api/jobs/{id}", get(handlers::get_job))
        .route("/api/jobs/{id}/logs", get(handlers::get_logs))
        .route("/api/jobs/{id}/logs/stream", get(sse::stream_logs))
        .route("/api/jobs/{id}/artifacts", get(handlers::list_artifacts))
        .route("/api/jobs/{id}/artifacts/{aid}", get(handlers::download_artifact))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), proxy::federation))
        .layer(middleware::from_fn_with_state(state.clone(), cors::cors))
        .layer(middleware::from_fn_with_state(state.clone(), request_context))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Outermost middleware: assign the request ID and client host, and echo
/// the ID on the response unless a proxied backend already set one.
pub(crate) async fn request_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 64)
        .map(String::from)
        .unwrap_or_else(|| RequestId::new().to_string());

    let client_host = client_host(&state, &req);
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        client_host,
    });

    let mut response = next.run(req).await;
    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
    response
}

/// The client host used for captcha binding and rate limiting: the
/// leftmost `X-Forwarded-For` entry when the deployment trusts its
/// proxy, otherwise the socket peer address.
fn client_host(state: &AppState, req: &Request) -> String {
    if state.cfg.trust_proxy_headers {
        let forwarded = req
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(host) = forwarded {
            return host.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
