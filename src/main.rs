//! # Gemini Bridge
//!
//! Request-translation proxy between Anthropic/OpenAI clients and a
//! Gemini-backed upstream gateway.
//!
//! ## Features
//!
//! - Claude and GPT model names mapped onto backend models
//! - Tool schemas normalized into the subset the backend accepts
//! - Token counting with upstream delegation and local fallback
//! - Streaming-safe usage accounting
//! - Health, readiness and Prometheus endpoints
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (port 8318, upstream http://127.0.0.1:8317)
//! gemini-bridge
//!
//! # Point at another upstream with request logging
//! gemini-bridge --upstream http://gateway:8317 --log-requests
//!
//! # Environment overrides defaults but never explicit flags
//! CLIPROXY_PORT=9000 gemini-bridge
//! ```

use anyhow::Context;
use bridge_config::ConfigArgs;
use bridge_server::{AppState, Server};
use bridge_telemetry::{init_logging, LoggingConfig};
use clap::Parser;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = ConfigArgs::parse();
    let logging = LoggingConfig::from_debug(args.debug).with_json(args.json_logs);
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Gemini bridge");

    if let Err(e) = run(args).await {
        error!(error = format!("{e:#}"), "Bridge failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("Invalid configuration")?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        upstream = %config.upstream.url,
        "Configuration loaded"
    );

    let state = AppState::builder()
        .config(config)
        .build()
        .context("Failed to initialize bridge state")?;

    Server::new(state).run().await.context("Server error")?;

    info!("Gemini bridge stopped");
    Ok(())
}
