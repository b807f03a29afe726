//! Validated runtime configuration.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8318;

/// Default upstream gateway
pub const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:8317";

/// Default cap on buffered request bodies (64 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Complete bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Upstream gateway settings
    pub upstream: UpstreamSettings,
    /// Upstream health probing
    pub health: HealthSettings,
    /// Graceful shutdown timings
    pub shutdown: ShutdownSettings,
    /// Logging switches
    pub logging: LogSettings,
    /// Characters per token for local estimation
    pub token_multiplier: f64,
    /// Extra exact-match model aliases
    pub model_aliases: Vec<(String, String)>,
}

impl BridgeConfig {
    /// Create a configuration with defaults for the given upstream
    #[must_use]
    pub fn new(upstream: Url) -> Self {
        Self {
            server: ServerSettings::default(),
            upstream: UpstreamSettings::new(upstream),
            health: HealthSettings::default(),
            shutdown: ShutdownSettings::default(),
            logging: LogSettings::default(),
            token_multiplier: 4.0,
            model_aliases: Vec::new(),
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.upstream.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set the token multiplier
    #[must_use]
    pub fn with_token_multiplier(mut self, multiplier: f64) -> Self {
        self.token_multiplier = multiplier;
        self
    }

    /// Add a model alias
    #[must_use]
    pub fn with_model_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_aliases.push((from.into(), to.into()));
        self
    }

    /// Set the logging switches
    #[must_use]
    pub fn with_logging(mut self, logging: LogSettings) -> Self {
        self.logging = logging;
        self
    }

    /// Set the health probe timings
    #[must_use]
    pub fn with_health(mut self, health: HealthSettings) -> Self {
        self.health = health;
        self
    }

    /// Set the shutdown timings
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownSettings) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Maximum time to read a request body
    pub read_timeout: Duration,
    /// Largest request body accepted, in bytes
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            read_timeout: Duration::from_secs(300),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream gateway settings
#[derive(Clone)]
pub struct UpstreamSettings {
    /// Base URL of the upstream gateway
    pub url: Url,
    /// Key used when the client sends no credentials
    pub api_key: Option<SecretString>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Time allowed until upstream response headers arrive
    pub response_header_timeout: Duration,
    /// Longest silence tolerated inside a response body
    pub stream_idle_timeout: Duration,
    /// Overall timeout for delegated token counting
    pub count_tokens_timeout: Duration,
    /// Idle pooled connections kept per host
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,
}

impl UpstreamSettings {
    /// Settings with default timeouts for the given upstream
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(600),
            count_tokens_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 20,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }

    /// Absolute upstream URL for a request path (with optional query)
    #[must_use]
    pub fn endpoint(&self, path_and_query: &str) -> String {
        let base = self.url.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }

    /// Raw API key
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
    }

    /// API key safe for logs
    #[must_use]
    pub fn masked_api_key(&self) -> String {
        match self.api_key() {
            None => "<none>".to_string(),
            Some(key) => {
                let visible: String = key.chars().take(4).collect();
                format!("{visible}****")
            }
        }
    }
}

impl fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("url", &self.url.as_str())
            .field("api_key", &self.masked_api_key())
            .field("connect_timeout", &self.connect_timeout)
            .field("response_header_timeout", &self.response_header_timeout)
            .field("stream_idle_timeout", &self.stream_idle_timeout)
            .field("count_tokens_timeout", &self.count_tokens_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .finish()
    }
}

/// Upstream health probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    /// Time between probes
    pub interval: Duration,
    /// Timeout for a single probe
    pub timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Graceful shutdown timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSettings {
    /// Delay between reporting unhealthy and closing the listener
    pub grace_period: Duration,
    /// Maximum time to wait for in-flight requests
    pub drain_timeout: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Logging switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Verbose logging including truncated request bodies
    pub debug: bool,
    /// One log line per inbound request
    pub log_requests: bool,
    /// Emit JSON log lines
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(url: &str) -> UpstreamSettings {
        UpstreamSettings::new(Url::parse(url).unwrap())
    }

    #[test]
    fn test_endpoint_joins_paths() {
        assert_eq!(
            upstream("http://127.0.0.1:8317").endpoint("/v1/messages"),
            "http://127.0.0.1:8317/v1/messages"
        );
        assert_eq!(
            upstream("http://gw.local/prefix/").endpoint("/v1/models?x=1"),
            "http://gw.local/prefix/v1/models?x=1"
        );
        assert_eq!(
            upstream("https://gw.local").endpoint("health"),
            "https://gw.local/health"
        );
    }

    #[test]
    fn test_api_key_is_masked() {
        let config = BridgeConfig::new(Url::parse(DEFAULT_UPSTREAM).unwrap())
            .with_api_key("sk-secret-value");
        assert_eq!(config.upstream.api_key(), Some("sk-secret-value"));
        assert_eq!(config.upstream.masked_api_key(), "sk-s****");

        let debug = format!("{:?}", config.upstream);
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("sk-s****"));
    }

    #[test]
    fn test_missing_api_key() {
        let settings = upstream(DEFAULT_UPSTREAM);
        assert_eq!(settings.api_key(), None);
        assert_eq!(settings.masked_api_key(), "<none>");
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::new(Url::parse(DEFAULT_UPSTREAM).unwrap());
        assert_eq!(config.server.bind_address(), "0.0.0.0:8318");
        assert_eq!(config.health.interval, Duration::from_secs(10));
        assert_eq!(config.health.timeout, Duration::from_secs(5));
        assert_eq!(config.upstream.pool_max_idle_per_host, 20);
        assert!((config.token_multiplier - 4.0).abs() < f64::EPSILON);
        assert!(!config.logging.debug);
    }
}
