// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane entry point: configuration, registry, HTTP server,
//! graceful shutdown.

use anyhow::Context;
use mfb_daemon::{http, proxy, AppState, Config};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load().context("load configuration")?;
    let port = cfg.port;
    let state = AppState::new(cfg).context("initialise components")?;

    if !state.peers.is_empty() {
        tokio::spawn(proxy::probe_loop(state.clone()));
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .context("bind listen address")?;
    tracing::info!(port, "control plane listening");

    let app = http::router(state.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serve http")?;

    // Let in-flight builds observe cancellation and finish as cancelled.
    state.registry.close().await;
    tracing::info!("control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
