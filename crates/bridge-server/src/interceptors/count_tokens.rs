//! `/v1/messages/count_tokens` interceptor.
//!
//! The rewritten body is sent to the upstream counter. Any upstream failure
//! (transport error, non-2xx, unparseable answer) is answered with a local
//! estimate instead, so this route never returns an upstream error.

use axum::{
    extract::{Request, State},
    http::Method,
    response::{IntoResponse, Response},
    Json,
};
use bridge_core::rewrite_count_tokens;
use serde::Serialize;
use tracing::debug;

use super::read_body;
use crate::{
    error::ApiError,
    proxy::{ProxyError, COUNT_TOKENS_PATH},
    state::AppState,
};

#[derive(Debug, Serialize)]
struct CountTokensResponse {
    input_tokens: u64,
}

/// Count input tokens, delegating upstream first
pub async fn count_tokens(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::POST {
        return ApiError::method_not_allowed().into_response();
    }

    let (parts, body) = request.into_parts();
    let body = match read_body(body, &state.config.server).await {
        Ok(body) => body,
        Err(error) => return error.into_response(),
    };

    let forwarded = match rewrite_count_tokens(&body, &state.models) {
        Ok(rewrite) => rewrite.into_body(body),
        Err(error) => {
            debug!(%error, "Rejecting count_tokens body");
            return ApiError::bad_request("Invalid JSON").into_response();
        }
    };

    let input_tokens = match state.proxy.count_tokens(&parts.headers, forwarded.clone()).await {
        Ok(tokens) => tokens,
        Err(error) => {
            if !matches!(error, ProxyError::Status(_) | ProxyError::InvalidResponse(_)) {
                state.proxy.report(&error, COUNT_TOKENS_PATH);
            }
            state.metrics.record_token_count_fallback();
            let estimate = state.estimator.estimate(&forwarded);
            debug!(
                error = %error,
                estimate,
                chars_per_token = state.estimator.chars_per_token(),
                "Upstream token count unavailable, using local estimate"
            );
            estimate
        }
    };

    Json(CountTokensResponse { input_tokens }).into_response()
}
