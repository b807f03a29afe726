//! `/v1/messages` interceptor.

use axum::{
    extract::{Request, State},
    http::Method,
    response::Response,
};
use bridge_core::{rewrite_messages, Rewrite};

use super::forward_with;
use crate::state::AppState;

/// Translate the model and tool schemas of an Anthropic Messages request
pub async fn messages(State(state): State<AppState>, request: Request) -> Response {
    let rewrite = request.method() == Method::POST;
    let models = state.models.clone();
    forward_with(&state, request, |body| {
        if rewrite {
            rewrite_messages(body, &models)
        } else {
            Rewrite::Unchanged
        }
    })
    .await
}
