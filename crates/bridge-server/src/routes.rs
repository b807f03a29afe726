//! Route definitions for the bridge.

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{handlers, interceptors, middleware, state::AppState};

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        // Metrics and usage
        .route("/metrics", get(handlers::metrics))
        .route("/usage", get(handlers::usage).delete(handlers::reset_usage))
        // Intercepted API routes
        .merge(api_routes())
        // Everything else goes upstream untouched
        .fallback(interceptors::passthrough)
        // Apply middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_requests,
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // Add state
        .with_state(state)
}

/// Routes whose request bodies are rewritten before forwarding
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/messages", any(interceptors::messages))
        .route("/v1/messages/count_tokens", any(interceptors::count_tokens))
        .route("/v1/chat/completions", any(interceptors::chat_completions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use bridge_config::BridgeConfig;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        // Nothing listens on port 9, so upstream calls fail fast.
        let config = BridgeConfig::new(url::Url::parse("http://127.0.0.1:9").unwrap());
        AppState::builder().config(config).build().unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["upstream_healthy"], false);
        assert_eq!(body["requests"], 1);
        assert!(body["uptime"].is_string());
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "alive");
    }

    #[tokio::test]
    async fn test_readiness_before_first_probe() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["reason"], "upstream_unavailable");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; version=0.0.4"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("bridge_requests_total 1"));
        assert!(text.contains("bridge_upstream_up"));
    }

    #[tokio::test]
    async fn test_request_id_is_set() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_usage_reset_via_delete() {
        let state = create_test_state();
        state.usage.record(&bridge_core::Usage {
            input_tokens: 5,
            ..Default::default()
        });
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/usage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "usage statistics reset");
        assert_eq!(body["usage"]["input_tokens"], 0);
        assert_eq!(state.usage.snapshot().input_tokens, 0);
    }

    #[tokio::test]
    async fn test_usage_get_and_query_reset() {
        let state = create_test_state();
        state.usage.record(&bridge_core::Usage {
            output_tokens: 9,
            ..Default::default()
        });

        let response = create_router(state.clone())
            .oneshot(Request::builder().uri("/usage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["output_tokens"], 9);
        assert_eq!(body["total_requests"], 1);

        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/usage?reset=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["usage"]["output_tokens"], 0);
    }

    #[tokio::test]
    async fn test_count_tokens_rejects_get() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/messages/count_tokens")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "Method not allowed");
    }

    #[tokio::test]
    async fn test_count_tokens_rejects_invalid_json() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/messages/count_tokens")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(
            body,
            serde_json::json!({"error": {"message": "Invalid JSON", "type": "invalid_request_error"}})
        );
    }

    #[tokio::test]
    async fn test_count_tokens_falls_back_when_upstream_down() {
        let state = create_test_state();
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/messages/count_tokens")
                    .body(Body::from(r#"{"messages":[{"role":"user","content":"hello world"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["input_tokens"].as_u64().unwrap() >= 1);
        assert_eq!(state.metrics.token_count_fallbacks(), 1);
    }

    #[tokio::test]
    async fn test_proxied_route_reports_bad_gateway_when_upstream_down() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/messages")
                    .body(Body::from(r#"{"model":"claude-3-5-haiku"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "upstream_error");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut config = BridgeConfig::new(url::Url::parse("http://127.0.0.1:9").unwrap());
        config.server.max_body_size = 16;
        let app = create_router(AppState::builder().config(config).build().unwrap());

        for uri in ["/v1/messages", "/v1/messages/count_tokens", "/v1/files"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri(uri)
                        .body(Body::from(r#"{"model":"claude-sonnet-4-5","messages":[]}"#))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE, "{uri}");
            let body = json_body(response).await;
            assert_eq!(body["error"]["type"], "invalid_request_error", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_health_degrades_during_grace_period() {
        let state = create_test_state();
        let coordinator = state.shutdown.clone();
        let app = create_router(state);

        let trigger = tokio::spawn(async move { coordinator.trigger_shutdown("test").await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Default grace period is 5s, so requests are still accepted here.
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "degraded");
        trigger.abort();
    }
}
