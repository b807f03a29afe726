//! `/v1/chat/completions` interceptor.

use axum::{
    extract::{Request, State},
    http::Method,
    response::Response,
};
use bridge_core::{rewrite_chat_completions, Rewrite};

use super::forward_with;
use crate::state::AppState;

/// Normalize the tool schemas of an OpenAI chat completions request.
///
/// Model names are forwarded unchanged.
pub async fn chat_completions(State(state): State<AppState>, request: Request) -> Response {
    let rewrite = request.method() == Method::POST;
    forward_with(&state, request, |body| {
        if rewrite {
            rewrite_chat_completions(body)
        } else {
            Rewrite::Unchanged
        }
    })
    .await
}
