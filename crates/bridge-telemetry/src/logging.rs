//! Structured logging setup.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::TelemetryError;

/// Longest request body excerpt written to debug logs
pub const MAX_LOGGED_BODY: usize = 500;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Configuration for the given debug switch
    #[must_use]
    pub fn from_debug(debug: bool) -> Self {
        if debug {
            Self::default().with_level("debug").with_target(true)
        } else {
            Self::default()
        }
    }

    /// Set the default level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Toggle JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Toggle event targets
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber
///
/// # Errors
/// Returns error if a global subscriber is already set
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let layer = if config.json {
        fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_filter(config.filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(config.with_target)
            .with_filter(config.filter())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::Logging(e.to_string()))?;

    info!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}

/// Cut a body down to [`MAX_LOGGED_BODY`] characters for logging
pub fn truncate_for_log(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX_LOGGED_BODY) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::default()
            .with_level("warn")
            .with_json(true)
            .with_target(true);
        assert_eq!(config.level, "warn");
        assert!(config.json);
        assert!(config.with_target);
    }

    #[test]
    fn test_debug_switch() {
        assert_eq!(LoggingConfig::from_debug(true).level, "debug");
        assert_eq!(LoggingConfig::from_debug(false).level, "info");
    }

    #[test]
    fn test_truncate_short_body() {
        assert_eq!(truncate_for_log(b"{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "é".repeat(MAX_LOGGED_BODY + 20);
        let truncated = truncate_for_log(body.as_bytes());
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), MAX_LOGGED_BODY + 3);
    }
}
