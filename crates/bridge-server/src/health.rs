//! Health state and upstream probing.
//!
//! Two flags drive the health endpoints:
//! - `healthy` is true until graceful shutdown begins
//! - `upstream_healthy` is written only by [`UpstreamProber`], which polls the
//!   upstream model list on a fixed interval

use bridge_config::{HealthSettings, UpstreamSettings};
use bridge_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Path probed on the upstream
pub const PROBE_PATH: &str = "/v1/models";

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally
    Ok,
    /// Shutting down
    Degraded,
}

impl HealthStatus {
    /// Get HTTP status code for this health status
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Ok | Self::Degraded => 200,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// `/health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: HealthStatus,
    /// Human-readable uptime
    pub uptime: String,
    /// Inbound requests since start
    pub requests: u64,
    /// Result of the last upstream probe
    pub upstream_healthy: bool,
}

/// `/health/live` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always "alive"
    pub status: String,
}

impl Default for LivenessResponse {
    fn default() -> Self {
        Self {
            status: "alive".to_string(),
        }
    }
}

/// `/health/ready` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready"
    pub status: String,
    /// Reason if not ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    /// Ready to serve
    #[must_use]
    pub fn ready() -> Self {
        Self {
            status: "ready".to_string(),
            reason: None,
        }
    }

    /// Not ready, with a reason
    #[must_use]
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            status: "not_ready".to_string(),
            reason: Some(reason.into()),
        }
    }

    /// Whether this is a ready response
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.reason.is_none()
    }
}

/// Process-wide health flags
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    upstream_healthy: AtomicBool,
    started_at: Instant,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Healthy process, upstream not yet probed
    #[must_use]
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            upstream_healthy: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Time since start
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// False once shutdown has begun
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Last upstream probe result
    #[must_use]
    pub fn is_upstream_healthy(&self) -> bool {
        self.upstream_healthy.load(Ordering::SeqCst)
    }

    /// Report unhealthy so load balancers stop routing here
    pub fn mark_shutting_down(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Store a probe result, returning the previous value
    pub(crate) fn set_upstream_healthy(&self, healthy: bool) -> bool {
        self.upstream_healthy.swap(healthy, Ordering::SeqCst)
    }

    /// Current `/health` status
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        if self.is_healthy() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        }
    }

    /// Current readiness
    #[must_use]
    pub fn readiness(&self) -> ReadinessResponse {
        if !self.is_healthy() {
            ReadinessResponse::not_ready("shutting_down")
        } else if !self.is_upstream_healthy() {
            ReadinessResponse::not_ready("upstream_unavailable")
        } else {
            ReadinessResponse::ready()
        }
    }
}

/// Background task that polls the upstream model list
pub struct UpstreamProber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    settings: HealthSettings,
    health: Arc<HealthState>,
    metrics: Metrics,
}

impl UpstreamProber {
    /// Create a prober for the given upstream
    pub fn new(
        client: reqwest::Client,
        upstream: &UpstreamSettings,
        settings: HealthSettings,
        health: Arc<HealthState>,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            url: upstream.endpoint(PROBE_PATH),
            api_key: upstream.api_key().map(str::to_owned),
            settings,
            health,
            metrics,
        }
    }

    /// Probe once and publish the result
    pub async fn probe(&self) -> bool {
        let mut request = self.client.get(&self.url).timeout(self.settings.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let healthy = match request.send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url = %self.url, status = status.as_u16(), "Upstream probe completed");
                !status.is_server_error()
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Upstream probe failed");
                false
            }
        };

        let previous = self.health.set_upstream_healthy(healthy);
        self.metrics.set_upstream_up(healthy);
        match (previous, healthy) {
            (false, true) => info!(url = %self.url, "Upstream is healthy"),
            (true, false) => warn!(url = %self.url, "Upstream became unavailable"),
            _ => {}
        }
        healthy
    }

    /// Probe forever; the first probe fires immediately
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            url = %self.url,
            interval = ?self.settings.interval,
            "Starting upstream health prober"
        );
        loop {
            ticker.tick().await;
            self.probe().await;
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let health = HealthState::new();
        assert!(health.is_healthy());
        assert!(!health.is_upstream_healthy());
        assert_eq!(health.status(), HealthStatus::Ok);
        assert_eq!(
            health.readiness().reason.as_deref(),
            Some("upstream_unavailable")
        );
    }

    #[test]
    fn test_ready_when_upstream_healthy() {
        let health = HealthState::new();
        assert!(!health.set_upstream_healthy(true));
        assert!(health.readiness().is_ready());
        assert_eq!(health.readiness().status, "ready");
    }

    #[test]
    fn test_shutdown_degrades() {
        let health = HealthState::new();
        health.set_upstream_healthy(true);
        health.mark_shutting_down();
        assert_eq!(health.status(), HealthStatus::Degraded);
        assert_eq!(health.status().to_string(), "degraded");
        assert!(!health.readiness().is_ready());
    }

    #[test]
    fn test_readiness_serialization() {
        let body = serde_json::to_value(ReadinessResponse::not_ready("upstream_unavailable")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": "not_ready", "reason": "upstream_unavailable"})
        );
        let body = serde_json::to_value(ReadinessResponse::ready()).unwrap();
        assert_eq!(body, serde_json::json!({"status": "ready"}));
    }

    #[tokio::test]
    async fn test_probe_against_closed_port_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let url = url::Url::parse(&format!("http://{address}")).unwrap();
        let health = Arc::new(HealthState::new());
        health.set_upstream_healthy(true);
        let prober = UpstreamProber::new(
            reqwest::Client::new(),
            &UpstreamSettings::new(url),
            HealthSettings {
                interval: Duration::from_secs(1),
                timeout: Duration::from_millis(500),
            },
            health.clone(),
            Metrics::new().unwrap(),
        );

        assert!(!prober.probe().await);
        assert!(!health.is_upstream_healthy());
    }
}
