//! Graceful shutdown for the bridge.
//!
//! On a signal the coordinator marks health as shutting down, keeps serving
//! for the grace period, then closes the listener and waits for in-flight
//! requests up to the drain timeout. The upstream prober is aborted last.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::health::HealthState;

const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Shutdown timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Time between reporting unhealthy and closing the listener
    pub grace_period: Duration,
    /// Upper bound on waiting for in-flight requests
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self::from(bridge_config::ShutdownSettings::default())
    }
}

impl From<bridge_config::ShutdownSettings> for ShutdownConfig {
    fn from(settings: bridge_config::ShutdownSettings) -> Self {
        Self {
            grace_period: settings.grace_period,
            drain_timeout: settings.drain_timeout,
        }
    }
}

/// Where the process is in its shutdown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving normally
    Running,
    /// Reporting unhealthy while still accepting requests
    Grace,
    /// Listener closed, in-flight requests finishing
    Draining,
    /// Drain timed out with requests still open
    ForceClose,
    /// Nothing left to wait for
    Complete,
}

impl ShutdownPhase {
    /// Label used in logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Grace => "grace",
            Self::Draining => "draining",
            Self::ForceClose => "force_close",
            Self::Complete => "complete",
        }
    }

    fn accepts_requests(self) -> bool {
        matches!(self, Self::Running | Self::Grace)
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the shutdown sequence and counts in-flight requests
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    health: Arc<HealthState>,
    phase: watch::Sender<ShutdownPhase>,
    triggered: AtomicBool,
    in_flight: AtomicU64,
    idle: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &self.current_phase())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl ShutdownCoordinator {
    /// Create a coordinator that reports through `health`
    #[must_use]
    pub fn new(config: ShutdownConfig, health: Arc<HealthState>) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            health,
            phase,
            triggered: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            idle: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Whether a shutdown has been requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Current phase
    #[must_use]
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Requests currently holding a [`RequestGuard`]
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// New requests are refused once the listener has closed
    #[must_use]
    pub fn should_accept_requests(&self) -> bool {
        self.current_phase().accepts_requests()
    }

    /// Resolves when the listener should stop accepting connections
    pub fn listener_closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.wait_for_phase(|phase| !phase.accepts_requests())
    }

    /// Resolves when shutdown has finished
    pub fn completed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.wait_for_phase(|phase| phase == ShutdownPhase::Complete)
    }

    fn wait_for_phase(
        &self,
        done: fn(ShutdownPhase) -> bool,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut phase = self.phase.subscribe();
        async move {
            let _ = phase.wait_for(|phase| done(*phase)).await;
        }
    }

    /// Abort `handle` once draining ends
    pub async fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Run the shutdown sequence. Later calls return immediately.
    pub async fn trigger_shutdown(&self, reason: &str) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!(reason, "Shutdown already in progress");
            return;
        }
        info!(reason, "Shutting down");

        self.health.mark_shutting_down();
        self.enter(ShutdownPhase::Grace);
        if !self.config.grace_period.is_zero() {
            sleep(self.config.grace_period).await;
        }

        self.enter(ShutdownPhase::Draining);
        if timeout(self.config.drain_timeout, self.drain()).await.is_err() {
            warn!(
                remaining = self.in_flight_count(),
                "Drain timeout reached, abandoning open requests"
            );
            self.enter(ShutdownPhase::ForceClose);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in &tasks {
            task.abort();
        }
        debug!(count = tasks.len(), "Background tasks stopped");

        self.enter(ShutdownPhase::Complete);
    }

    fn enter(&self, phase: ShutdownPhase) {
        info!(%phase, in_flight = self.in_flight_count(), "Shutdown phase");
        self.phase.send_replace(phase);
    }

    async fn drain(&self) {
        let mut logged = Instant::now();
        loop {
            // Registered before the count is read so a wakeup cannot be missed.
            let idle = self.idle.notified();
            let remaining = self.in_flight_count();
            if remaining == 0 {
                return;
            }
            if logged.elapsed() >= DRAIN_LOG_INTERVAL {
                info!(remaining, "Waiting for in-flight requests");
                logged = Instant::now();
            }
            let _ = timeout(DRAIN_LOG_INTERVAL, idle).await;
        }
    }

    fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn request_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Counts one request as in flight until dropped
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl RequestGuard {
    /// `None` once the listener has closed
    #[must_use]
    pub fn new(coordinator: Arc<ShutdownCoordinator>) -> Option<Self> {
        if !coordinator.should_accept_requests() {
            return None;
        }
        coordinator.request_started();
        Some(Self { coordinator })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_finished();
    }
}

/// Resolves with the signal name on Ctrl+C or SIGTERM
///
/// # Panics
/// Panics if a signal handler cannot be installed
#[allow(clippy::expect_used)]
pub async fn shutdown_signal() -> String {
    let interrupt = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
        "ctrl+c"
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
        "sigterm"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let name = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = name, "Signal received");
    name.to_string()
}
