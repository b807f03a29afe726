//! # Bridge Config
//!
//! Configuration for the Gemini bridge.
//!
//! Settings come from command-line flags, then `CLIPROXY_*` environment
//! variables, then built-in defaults. An explicit flag always wins over the
//! environment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod args;
mod config;
mod error;

pub use args::ConfigArgs;
pub use config::{
    BridgeConfig, HealthSettings, LogSettings, ServerSettings, ShutdownSettings,
    UpstreamSettings, DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT, DEFAULT_UPSTREAM,
};
pub use error::ConfigError;
