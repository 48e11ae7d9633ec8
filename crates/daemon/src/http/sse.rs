// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live log streaming over server-sent events.
//!
//! On subscription the full current buffer is replayed as `log` events,
//! then live lines follow. A `ping` event fires every 15 seconds so
//! intermediaries keep the connection open. The stream ends when the job
//! reaches a terminal state and the subscriber queue drains, or when the
//! client goes away (dropping the stream detaches the subscriber).

use super::{AppState, RequestContext};
use crate::http::handlers;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{SecondsFormat, Utc};
use mfb_core::{LogSubscription, SubscriberGuard};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

pub(crate) async fn stream_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.subscribe(&id) {
        Ok(subscription) => sse_response(subscription),
        Err(err) => handlers::registry_error_response(&ctx, err),
    }
}

struct Pump {
    replay: std::vec::IntoIter<String>,
    stream: mpsc::Receiver<String>,
    ping: Interval,
    _guard: SubscriberGuard,
}

fn sse_response(subscription: LogSubscription) -> Response {
    let LogSubscription { snapshot, stream, guard } = subscription;

    let pump = Pump {
        replay: snapshot.into_iter(),
        stream,
        ping: tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL),
        _guard: guard,
    };

    let events = futures::stream::unfold(pump, |mut pump| async move {
        if let Some(line) = pump.replay.next() {
            return Some((Ok::<Event, Infallible>(log_event(&line)), pump));
        }

        tokio::select! {
            line = pump.stream.recv() => match line {
                Some(line) => Some((Ok(log_event(&line)), pump)),
                // Closed and drained: the job is terminal.
                None => None,
            },
            _ = pump.ping.tick() => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                Some((Ok(Event::default().event("ping").data(now)), pump))
            }
        }
    });

    Sse::new(events).into_response()
}

fn log_event(line: &str) -> Event {
    // Interior carriage returns (progress output) are not valid in an
    // event-stream data field.
    if line.contains('\r') {
        Event::default().event("log").data(line.replace('\r', ""))
    } else {
        Event::default().event("log").data(line)
    }
}
