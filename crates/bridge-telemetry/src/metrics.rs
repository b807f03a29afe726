//! Prometheus metrics.
//!
//! Each [`Metrics`] owns its own registry, so tests and multiple servers in
//! one process never collide on metric names.

use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::TelemetryError;

/// Bridge metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    uptime_seconds: Gauge,
    requests_total: IntCounter,
    requests_by_route: IntCounterVec,
    request_duration: HistogramVec,
    upstream_up: IntGauge,
    upstream_errors: IntCounterVec,
    token_count_fallbacks: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("requests_total", &self.requests_total.get())
            .field("upstream_up", &self.upstream_up.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "bridge_uptime_seconds",
            "Seconds since the bridge started",
        ))?;
        let requests_total = IntCounter::with_opts(Opts::new(
            "bridge_requests_total",
            "Total inbound requests",
        ))?;
        let requests_by_route = IntCounterVec::new(
            Opts::new(
                "bridge_requests_by_route_total",
                "Inbound requests by route and status",
            ),
            &["route", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "bridge_request_duration_seconds",
                "Time until response headers were sent",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["route"],
        )?;
        let upstream_up = IntGauge::with_opts(Opts::new(
            "bridge_upstream_up",
            "Whether the last upstream health probe succeeded",
        ))?;
        let upstream_errors = IntCounterVec::new(
            Opts::new(
                "bridge_upstream_errors_total",
                "Upstream transport failures by kind",
            ),
            &["kind"],
        )?;
        let token_count_fallbacks = IntCounter::with_opts(Opts::new(
            "bridge_token_count_fallbacks_total",
            "Token count requests answered by local estimation",
        ))?;

        registry.register(Box::new(uptime_seconds.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_by_route.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(upstream_up.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(token_count_fallbacks.clone()))?;

        Ok(Self {
            registry,
            started_at: Instant::now(),
            uptime_seconds,
            requests_total,
            requests_by_route,
            request_duration,
            upstream_up,
            upstream_errors,
            token_count_fallbacks,
        })
    }

    /// Count a request as it arrives
    pub fn record_request_start(&self) {
        self.requests_total.inc();
    }

    /// Record a finished request
    pub fn record_response(&self, route: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.requests_by_route
            .with_label_values(&[route, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
    }

    /// Record an upstream transport failure
    pub fn record_upstream_error(&self, kind: &str) {
        self.upstream_errors.with_label_values(&[kind]).inc();
    }

    /// Record a locally estimated token count
    pub fn record_token_count_fallback(&self) {
        self.token_count_fallbacks.inc();
    }

    /// Publish the upstream health flag
    pub fn set_upstream_up(&self, up: bool) {
        self.upstream_up.set(i64::from(up));
    }

    /// Total inbound requests so far
    #[must_use]
    pub fn requests_total(&self) -> u64 {
        self.requests_total.get()
    }

    /// Locally estimated token counts so far
    #[must_use]
    pub fn token_count_fallbacks(&self) -> u64 {
        self.token_count_fallbacks.get()
    }

    /// Time since start
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Text exposition of every metric
    pub fn gather(&self) -> String {
        self.uptime_seconds.set(self.uptime().as_secs_f64());
        match TextEncoder::new().encode_to_string(&self.registry.gather()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}
