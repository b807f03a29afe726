//! # Bridge Server
//!
//! HTTP server for the Gemini bridge.
//!
//! This crate provides:
//! - Axum-based HTTP server with per-route request interceptors
//! - Pooled, streaming-safe reverse-proxy transport to the upstream gateway
//! - Usage accounting on every proxied response
//! - Health, readiness and liveness endpoints backed by an upstream prober
//! - Prometheus metrics and usage endpoints
//! - Graceful shutdown handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod health;
pub mod interceptors;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use error::{ApiError, ServerError};
pub use health::{HealthState, LivenessResponse, ReadinessResponse, UpstreamProber};
pub use proxy::{ProxyError, ProxyTransport};
pub use routes::create_router;
pub use server::Server;
pub use shutdown::{
    shutdown_signal, RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownPhase,
};
pub use state::AppState;
