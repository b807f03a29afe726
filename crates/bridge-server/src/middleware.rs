//! Request accounting middleware.

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

use crate::{error::ApiError, shutdown::RequestGuard, state::AppState};

/// Route label for requests that matched no explicit route
pub const FALLBACK_ROUTE: &str = "fallback";

/// Count requests, refuse work while draining and optionally log each request
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    state.metrics.record_request_start();

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| FALLBACK_ROUTE.to_owned(), |matched| matched.as_str().to_owned());
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (response, guard) = match RequestGuard::new(state.shutdown.clone()) {
        Some(guard) => (next.run(request).await, Some(guard)),
        None => (ApiError::shutting_down().into_response(), None),
    };

    let status = response.status();
    let elapsed = started.elapsed();
    state.metrics.record_response(&route, status.as_u16(), elapsed);

    if state.config.logging.log_requests {
        info!(
            %method,
            path,
            remote = remote.map(|addr| addr.to_string()).unwrap_or_default(),
            status = status.as_u16(),
            latency_ms = elapsed.as_millis() as u64,
            "Request"
        );
    }

    match guard {
        Some(guard) => hold_until_body_done(response, guard),
        None => response,
    }
}

/// Keep a request counted as in flight until a streamed body finishes
fn hold_until_body_done(response: Response, guard: RequestGuard) -> Response {
    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}
