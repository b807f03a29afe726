//! Command-line arguments.

use clap::Parser;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::config::{
    BridgeConfig, HealthSettings, LogSettings, ServerSettings, ShutdownSettings, UpstreamSettings,
    DEFAULT_MAX_BODY_SIZE, DEFAULT_UPSTREAM,
};
use crate::error::ConfigError;

/// Gemini bridge - rewrites Anthropic and OpenAI requests for a Gemini-backed gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "gemini-bridge")]
#[command(author, version, about, long_about = None)]
pub struct ConfigArgs {
    /// Host to bind to
    #[arg(long, env = "CLIPROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "CLIPROXY_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Upstream gateway base URL
    #[arg(short, long, env = "CLIPROXY_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,

    /// API key used when the client sends no credentials
    #[arg(short = 'k', long, env = "CLIPROXY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "CLIPROXY_DEBUG")]
    pub debug: bool,

    /// Log every inbound request
    #[arg(long, env = "CLIPROXY_LOG_REQUESTS")]
    pub log_requests: bool,

    /// Emit logs as JSON
    #[arg(long, env = "CLIPROXY_JSON_LOGS")]
    pub json_logs: bool,

    /// Characters per token for local token estimation
    #[arg(long, env = "CLIPROXY_TOKEN_MULTIPLIER", default_value_t = 4.0)]
    pub token_multiplier: f64,

    /// Extra model mapping, repeatable (FROM=TO)
    #[arg(
        long = "model-alias",
        env = "CLIPROXY_MODEL_ALIASES",
        value_name = "FROM=TO",
        value_delimiter = ','
    )]
    pub model_aliases: Vec<String>,

    /// Upstream TCP connect timeout
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Time allowed for upstream response headers
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub response_header_timeout: Duration,

    /// Longest silence tolerated inside a streamed response
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub stream_idle_timeout: Duration,

    /// Maximum time to read a request body
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub read_timeout: Duration,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "CLIPROXY_MAX_BODY_SIZE", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,

    /// Idle pooled connections kept per upstream host
    #[arg(long, default_value_t = 20)]
    pub pool_max_idle_per_host: usize,

    /// How long idle pooled connections are kept
    #[arg(long, default_value = "90s", value_parser = humantime::parse_duration)]
    pub pool_idle_timeout: Duration,

    /// Interval between upstream health probes
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub health_interval: Duration,

    /// Timeout for a single health probe
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub health_timeout: Duration,

    /// Delay between reporting unhealthy and closing the listener
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub shutdown_grace: Duration,

    /// Maximum time to wait for in-flight requests on shutdown
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub drain_timeout: Duration,
}

impl ConfigArgs {
    /// Validate and convert into a [`BridgeConfig`]
    pub fn into_config(self) -> Result<BridgeConfig, ConfigError> {
        let url = parse_upstream(&self.upstream)?;

        if !self.token_multiplier.is_finite() || self.token_multiplier <= 0.0 {
            return Err(ConfigError::InvalidTokenMultiplier(self.token_multiplier));
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }
        if self.health_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "health-interval",
            });
        }
        if self.health_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "health-timeout",
            });
        }

        let model_aliases = self
            .model_aliases
            .iter()
            .filter(|alias| !alias.trim().is_empty())
            .map(|alias| parse_alias(alias))
            .collect::<Result<Vec<_>, _>>()?;

        if self.health_timeout > self.health_interval {
            warn!(
                timeout = ?self.health_timeout,
                interval = ?self.health_interval,
                "Health timeout exceeds probe interval"
            );
        }

        let mut upstream = UpstreamSettings::new(url);
        upstream.api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .map(secrecy::SecretString::new);
        upstream.connect_timeout = self.connect_timeout;
        upstream.response_header_timeout = self.response_header_timeout;
        upstream.stream_idle_timeout = self.stream_idle_timeout;
        upstream.pool_max_idle_per_host = self.pool_max_idle_per_host;
        upstream.pool_idle_timeout = self.pool_idle_timeout;

        Ok(BridgeConfig {
            server: ServerSettings {
                host: self.host,
                port: self.port,
                read_timeout: self.read_timeout,
                max_body_size: self.max_body_size,
            },
            upstream,
            health: HealthSettings {
                interval: self.health_interval,
                timeout: self.health_timeout,
            },
            shutdown: ShutdownSettings {
                grace_period: self.shutdown_grace,
                drain_timeout: self.drain_timeout,
            },
            logging: LogSettings {
                debug: self.debug,
                log_requests: self.log_requests,
                json: self.json_logs,
            },
            token_multiplier: self.token_multiplier,
            model_aliases,
        })
    }
}

fn parse_upstream(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUpstream {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::UnsupportedScheme {
            scheme: scheme.to_string(),
        }),
    }
}

fn parse_alias(raw: &str) -> Result<(String, String), ConfigError> {
    let (from, to) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidAlias(raw.to_string()))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(ConfigError::InvalidAlias(raw.to_string()));
    }
    Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ConfigArgs {
        let mut argv = vec!["gemini-bridge"];
        argv.extend_from_slice(args);
        ConfigArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_build_config() {
        let config = parse(&[
            "--port",
            "9000",
            "--upstream",
            "https://gw.example.com/base",
            "--api-key",
            "sk-test",
            "--debug",
            "--token-multiplier",
            "3.5",
            "--model-alias",
            "claude-x=gemini-3-pro",
            "--model-alias",
            "a=b,c=d",
            "--health-interval",
            "30s",
            "--drain-timeout",
            "1m",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.url.as_str(), "https://gw.example.com/base");
        assert_eq!(config.upstream.api_key(), Some("sk-test"));
        assert!(config.logging.debug);
        assert!(!config.logging.log_requests);
        assert!((config.token_multiplier - 3.5).abs() < f64::EPSILON);
        assert_eq!(
            config.model_aliases,
            vec![
                ("claude-x".to_string(), "gemini-3-pro".to_string()),
                ("a".to_string(), "b".to_string()),
                ("c".to_string(), "d".to_string()),
            ]
        );
        assert_eq!(config.health.interval, Duration::from_secs(30));
        assert_eq!(config.shutdown.drain_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_multiplier() {
        let err = parse(&["--token-multiplier", "0"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTokenMultiplier(_)));
        let err = parse(&["--token-multiplier=-2"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTokenMultiplier(_)));
    }

    #[test]
    fn test_rejects_bad_upstream() {
        let err = parse(&["--upstream", "not a url"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUpstream { .. }));
        let err = parse(&["--upstream", "ftp://gw"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_rejects_bad_alias() {
        for alias in ["nope", "=x", "x="] {
            let err = parse(&["--model-alias", alias]).into_config().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidAlias(_)), "{alias}");
        }
    }

    #[test]
    fn test_rejects_zero_health_interval() {
        let err = parse(&["--health-interval", "0s"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { .. }));
    }

    #[test]
    fn test_body_limit_flag() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.server.max_body_size, DEFAULT_MAX_BODY_SIZE);

        let config = parse(&["--max-body-size", "1024"]).into_config().unwrap();
        assert_eq!(config.server.max_body_size, 1024);

        let err = parse(&["--max-body-size", "0"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroBodyLimit));
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let config = parse(&["--api-key", ""]).into_config().unwrap();
        assert!(config.upstream.api_key.is_none());
    }

    #[test]
    fn test_invalid_duration_is_a_parse_error() {
        assert!(ConfigArgs::try_parse_from(["gemini-bridge", "--connect-timeout", "soon"]).is_err());
    }

    // The only test that touches the process environment.
    #[test]
    fn test_environment_overrides_defaults_but_not_flags() {
        std::env::set_var("CLIPROXY_UPSTREAM_URL", "http://env-upstream:1234");
        std::env::set_var("CLIPROXY_TOKEN_MULTIPLIER", "2.0");

        let from_env = parse(&[]).into_config().unwrap();
        let from_flag = parse(&["--upstream", "http://flag-upstream:1"])
            .into_config()
            .unwrap();

        std::env::remove_var("CLIPROXY_UPSTREAM_URL");
        std::env::remove_var("CLIPROXY_TOKEN_MULTIPLIER");

        assert_eq!(from_env.upstream.url.as_str(), "http://env-upstream:1234/");
        assert!((from_env.token_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(from_flag.upstream.url.as_str(), "http://flag-upstream:1/");
        assert!((from_flag.token_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
