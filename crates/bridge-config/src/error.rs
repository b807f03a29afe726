//! Configuration errors.

use thiserror::Error;

/// Errors raised while validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Upstream URL could not be parsed
    #[error("invalid upstream URL '{url}': {source}")]
    InvalidUpstream {
        /// The rejected value
        url: String,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// Upstream URL uses a scheme other than http or https
    #[error("unsupported upstream scheme '{scheme}', expected http or https")]
    UnsupportedScheme {
        /// The rejected scheme
        scheme: String,
    },

    /// Token multiplier is not a positive finite number
    #[error("token multiplier must be a positive number, got {0}")]
    InvalidTokenMultiplier(f64),

    /// Model alias is not of the form FROM=TO
    #[error("invalid model alias '{0}', expected FROM=TO")]
    InvalidAlias(String),

    /// A duration that must be non-zero was zero
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending setting
        field: &'static str,
    },

    /// Request body limit was zero
    #[error("max-body-size must be greater than zero")]
    ZeroBodyLimit,
}
