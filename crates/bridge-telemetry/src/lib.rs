//! # Bridge Telemetry
//!
//! Observability for the Gemini bridge.
//!
//! This crate provides:
//! - Structured logging setup (human or JSON output)
//! - Prometheus metrics with a text exposition endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

use thiserror::Error;

// Re-export main types
pub use logging::{init_logging, truncate_for_log, LoggingConfig};
pub use metrics::Metrics;

/// Telemetry initialization error
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the global subscriber
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
    /// Failed to create or register a metric
    #[error("Failed to register metric: {0}")]
    Metrics(#[from] prometheus::Error),
}
