//! Reverse-proxy transport to the upstream gateway.
//!
//! Every proxied request shares one pooled [`reqwest::Client`]. Responses are
//! relayed chunk by chunk through [`ObservedBody`], which feeds usage records
//! to the tracker without holding bytes back. Dropping the body (for example
//! when the client disconnects, or once a sized body has been written) drops
//! the upstream stream, aborts the upstream request and flushes the observer.

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use bridge_config::UpstreamSettings;
use bridge_core::{UsageObserver, UsageTracker};
use bridge_telemetry::{truncate_for_log, Metrics};
use bytes::Bytes;
use futures::Stream;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::Sleep;
use tracing::{debug, warn};

use crate::{error::ApiError, health::HealthState};

/// Upstream token counting endpoint
pub const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const ANTHROPIC_VERSION: HeaderName = HeaderName::from_static("anthropic-version");

/// Upstream transport failure
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A timeout elapsed before upstream answered
    #[error("upstream timed out waiting for {phase}")]
    Timeout {
        /// What was being waited for
        phase: &'static str,
    },

    /// Upstream refused the TCP connection
    #[error("upstream refused the connection: {0}")]
    Refused(#[source] reqwest::Error),

    /// Connection could not be established (DNS, TLS, routing)
    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] reqwest::Error),

    /// Request or body transfer failed after connecting
    #[error("upstream transfer failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("upstream returned {0}")]
    Status(StatusCode),

    /// Upstream answered with an unexpected body
    #[error("unexpected upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout { phase: "upstream" }
        } else if is_connection_refused(&error) {
            Self::Refused(error)
        } else if error.is_connect() {
            Self::Connect(error)
        } else {
            Self::Transport(error)
        }
    }
}

impl ProxyError {
    /// Short label used for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Refused(_) => "refused",
            Self::Connect(_) => "connect",
            Self::Transport(_) => "transport",
            Self::Status(_) => "status",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Status returned to the client
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message returned to the client
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Upstream server timed out",
            Self::Refused(_) | Self::Connect(_) => "Upstream server is not available",
            _ => "Failed to connect to upstream server",
        }
    }
}

fn is_connection_refused(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

#[derive(Deserialize)]
struct CountTokensResponse {
    input_tokens: u64,
}

/// Build the pooled upstream client
pub fn build_client(settings: &UpstreamSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .no_gzip()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(settings.connect_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Forwards requests to the single upstream origin
#[derive(Clone)]
pub struct ProxyTransport {
    client: reqwest::Client,
    upstream: Arc<UpstreamSettings>,
    usage: Arc<UsageTracker>,
    health: Arc<HealthState>,
    metrics: Metrics,
    debug: bool,
}

impl ProxyTransport {
    /// Create a transport over an existing client
    pub fn new(
        client: reqwest::Client,
        upstream: Arc<UpstreamSettings>,
        usage: Arc<UsageTracker>,
        health: Arc<HealthState>,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            upstream,
            usage,
            health,
            metrics,
            debug: false,
        }
    }

    /// Log outbound bodies
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The pooled client
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Upstream settings
    #[must_use]
    pub fn upstream(&self) -> &UpstreamSettings {
        &self.upstream
    }

    /// Proxy a request, converting transport failures into JSON errors
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        match self.try_forward(method, uri, headers, body).await {
            Ok(response) => response,
            Err(error) => {
                self.report(&error, uri.path());
                ApiError::from(&error).into_response()
            }
        }
    }

    /// Proxy a request
    pub async fn try_forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ProxyError> {
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = self.upstream.endpoint(path);

        if self.debug {
            debug!(
                %method,
                %url,
                bytes = body.len(),
                body = %truncate_for_log(&body),
                "Forwarding request"
            );
        }

        let started = Instant::now();
        let send = self
            .client
            .request(method, &url)
            .headers(outbound_headers(headers))
            .body(body)
            .send();

        let upstream = tokio::time::timeout(self.upstream.response_header_timeout, send)
            .await
            .map_err(|_| ProxyError::Timeout {
                phase: "response headers",
            })??;

        debug!(
            %url,
            status = upstream.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        Ok(self.relay(upstream))
    }

    fn relay(&self, upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let mut headers = response_headers(upstream.headers());
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        if is_streaming_content_type(content_type.as_deref()) {
            headers.remove(header::CONTENT_LENGTH);
            headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }

        let declared_len = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let observer =
            UsageObserver::for_content_type(content_type.as_deref()).with_expected_len(declared_len);

        let body = ObservedBody::new(
            upstream.bytes_stream(),
            observer,
            self.usage.clone(),
            self.upstream.stream_idle_timeout,
        );

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Ask upstream to count tokens for an already rewritten body
    pub async fn count_tokens(&self, inbound: &HeaderMap, body: Bytes) -> Result<u64, ProxyError> {
        let url = self.upstream.endpoint(COUNT_TOKENS_PATH);
        let mut request = self
            .client
            .post(&url)
            .timeout(self.upstream.count_tokens_timeout)
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(auth) = non_empty(inbound, &header::AUTHORIZATION) {
            request = request.header(header::AUTHORIZATION, auth.clone());
        } else if let Some(key) = non_empty(inbound, &X_API_KEY) {
            request = request.header(X_API_KEY, key.clone());
        } else if let Some(key) = self.upstream.api_key() {
            request = request.bearer_auth(key);
        }
        if let Some(version) = non_empty(inbound, &ANTHROPIC_VERSION) {
            request = request.header(ANTHROPIC_VERSION, version.clone());
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            if self.debug {
                let body = response.bytes().await.unwrap_or_default();
                debug!(status = status.as_u16(), body = %truncate_for_log(&body), "Upstream token count rejected");
            }
            return Err(ProxyError::Status(status));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<CountTokensResponse>(&bytes)
            .map(|parsed| parsed.input_tokens)
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))
    }

    /// Record and log a transport failure
    pub fn report(&self, error: &ProxyError, path: &str) {
        self.metrics.record_upstream_error(error.kind());
        // Known-down upstreams would otherwise log on every request.
        if self.health.is_upstream_healthy() {
            warn!(
                path,
                upstream = %self.upstream.url,
                kind = error.kind(),
                error = %error,
                "Upstream request failed"
            );
        } else {
            debug!(
                path,
                upstream = %self.upstream.url,
                kind = error.kind(),
                error = %error,
                "Upstream request failed while upstream is unhealthy"
            );
        }
    }
}

fn non_empty<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a HeaderValue> {
    headers.get(name).filter(|value| !value.is_empty())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn filtered_headers(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name)
            || extra.contains(name)
            || listed.iter().any(|token| token == name.as_str())
        {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Headers sent upstream: no hop-by-hop, host, length or encoding negotiation
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    filtered_headers(
        inbound,
        &[header::HOST, header::CONTENT_LENGTH, header::ACCEPT_ENCODING],
    )
}

/// Headers relayed to the client
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    filtered_headers(upstream, &[])
}

/// Whether a response is an incremental stream
pub fn is_streaming_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|content_type| {
        let content_type = content_type.to_ascii_lowercase();
        content_type.contains("text/event-stream") || content_type.contains("application/x-ndjson")
    })
}

pin_project! {
    /// Response body that reports usage as chunks pass through
    pub struct ObservedBody<S> {
        #[pin]
        inner: S,
        #[pin]
        idle: Sleep,
        idle_timeout: Duration,
        observer: UsageObserver,
        tracker: Arc<UsageTracker>,
        done: bool,
    }

    impl<S> PinnedDrop for ObservedBody<S> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            this.observer.finish(this.tracker);
        }
    }
}

impl<S> ObservedBody<S> {
    /// Wrap an upstream byte stream
    pub fn new(
        inner: S,
        observer: UsageObserver,
        tracker: Arc<UsageTracker>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            idle: tokio::time::sleep(idle_timeout),
            idle_timeout,
            observer,
            tracker,
            done: false,
        }
    }
}

impl<S, E> Stream for ObservedBody<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<ProxyError>,
{
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.observer.observe(&chunk, this.tracker);
                let deadline = tokio::time::Instant::now() + *this.idle_timeout;
                this.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                *this.done = true;
                let error = error.into();
                debug!(error = %error, "Upstream body failed mid-stream");
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                this.observer.finish(this.tracker);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.idle.poll(cx).is_ready() {
                    *this.done = true;
                    warn!(idle_timeout = ?this.idle_timeout, "Upstream stream went idle, closing");
                    return Poll::Ready(Some(Err(ProxyError::Timeout {
                        phase: "stream data",
                    })));
                }
                Poll::Pending
            }
        }
    }
}
