//! Shared application state.

use bridge_config::{BridgeConfig, ConfigError, DEFAULT_UPSTREAM};
use bridge_core::{ModelTranslator, TokenEstimator, UsageTracker};
use bridge_telemetry::Metrics;
use std::sync::Arc;

use crate::{
    error::ServerError,
    health::HealthState,
    proxy::{build_client, ProxyTransport},
    shutdown::{ShutdownConfig, ShutdownCoordinator},
};

/// State cloned into every handler
#[derive(Clone)]
pub struct AppState {
    /// Bridge configuration
    pub config: Arc<BridgeConfig>,
    /// Model name translation
    pub models: Arc<ModelTranslator>,
    /// Local token estimation
    pub estimator: TokenEstimator,
    /// Aggregated usage counters
    pub usage: Arc<UsageTracker>,
    /// Health flags
    pub health: Arc<HealthState>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Upstream transport
    pub proxy: ProxyTransport,
    /// Graceful shutdown coordination
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl AppState {
    /// Create a new state builder
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }
}

/// Builder for [`AppState`]
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<BridgeConfig>,
    usage: Option<Arc<UsageTracker>>,
}

impl AppStateBuilder {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing usage tracker
    #[must_use]
    pub fn usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Build the state
    pub fn build(self) -> Result<AppState, ServerError> {
        let config = match self.config {
            Some(config) => config,
            None => BridgeConfig::new(default_upstream()?),
        };

        let models = ModelTranslator::new().with_aliases(config.model_aliases.iter().cloned());
        let estimator = TokenEstimator::new(config.token_multiplier);
        let usage = self.usage.unwrap_or_default();
        let health = Arc::new(HealthState::new());
        let metrics = Metrics::new()?;

        let client = build_client(&config.upstream)?;
        let proxy = ProxyTransport::new(
            client,
            Arc::new(config.upstream.clone()),
            usage.clone(),
            health.clone(),
            metrics.clone(),
        )
        .with_debug(config.logging.debug);

        let shutdown = Arc::new(ShutdownCoordinator::new(
            ShutdownConfig::from(config.shutdown),
            health.clone(),
        ));

        Ok(AppState {
            config: Arc::new(config),
            models: Arc::new(models),
            estimator,
            usage,
            health,
            metrics,
            proxy,
            shutdown,
        })
    }
}

fn default_upstream() -> Result<url::Url, ConfigError> {
    url::Url::parse(DEFAULT_UPSTREAM).map_err(|source| ConfigError::InvalidUpstream {
        url: DEFAULT_UPSTREAM.to_string(),
        source,
    })
}
