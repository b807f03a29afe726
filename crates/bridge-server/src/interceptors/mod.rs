//! Per-route request interceptors.
//!
//! Each interceptor buffers the inbound body, rewrites it where needed and
//! hands it to the shared [`ProxyTransport`](crate::proxy::ProxyTransport):
//! - [`messages`] maps the model and normalizes `tools[].input_schema`
//! - [`chat_completions`] normalizes `tools[].function.parameters`
//! - [`count_tokens`] delegates counting upstream with a local fallback
//! - [`passthrough`] forwards every other path untouched

mod chat_completions;
mod count_tokens;
mod messages;

pub use chat_completions::chat_completions;
pub use count_tokens::count_tokens;
pub use messages::messages;

use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use bridge_config::ServerSettings;
use bridge_core::Rewrite;
use bytes::Bytes;
use http_body_util::LengthLimitError;
use tracing::debug;

use crate::{error::ApiError, state::AppState};

/// Buffer a request body within the read timeout and size limit
pub(crate) async fn read_body(body: Body, settings: &ServerSettings) -> Result<Bytes, ApiError> {
    let read = axum::body::to_bytes(body, settings.max_body_size);
    match tokio::time::timeout(settings.read_timeout, read).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(error)) if is_length_limit(&error) => {
            debug!(limit = settings.max_body_size, "Request body over limit");
            Err(ApiError::payload_too_large())
        }
        Ok(Err(_)) => {
            debug!("Failed to read request body");
            Err(ApiError::bad_request("Failed to read request body"))
        }
        Err(_) => {
            debug!(timeout = ?settings.read_timeout, "Timed out reading request body");
            Err(ApiError::bad_request("Failed to read request body"))
        }
    }
}

fn is_length_limit(error: &axum::Error) -> bool {
    std::error::Error::source(error).is_some_and(|source| source.is::<LengthLimitError>())
}

/// Buffer, optionally rewrite and forward a request
pub(crate) async fn forward_with<F>(state: &AppState, request: Request, rewrite: F) -> Response
where
    F: FnOnce(&[u8]) -> Rewrite,
{
    let (parts, body) = request.into_parts();
    let body = match read_body(body, &state.config.server).await {
        Ok(body) => body,
        Err(error) => return error.into_response(),
    };

    let outcome = rewrite(&body);
    if outcome.is_rewritten() {
        debug!(path = parts.uri.path(), "Forwarding rewritten body");
    }
    let body = outcome.into_body(body);

    state
        .proxy
        .forward(parts.method, &parts.uri, &parts.headers, body)
        .await
}

/// Forward any other path byte-for-byte
pub async fn passthrough(State(state): State<AppState>, request: Request) -> Response {
    forward_with(&state, request, |_| Rewrite::Unchanged).await
}
