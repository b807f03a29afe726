//! Server lifecycle: bind, serve, probe and shut down.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    error::ServerError, health::UpstreamProber, routes::create_router, shutdown::shutdown_signal,
    state::AppState,
};

/// The bridge HTTP server
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server over prepared state
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.state.config.server.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        self.run_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `signal` resolves with a reason
    pub async fn run_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = String> + Send + 'static,
    {
        let state = self.state;
        let coordinator = state.shutdown.clone();
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;

        info!(
            address = %local_addr,
            upstream = %state.config.upstream.url,
            api_key = %state.config.upstream.masked_api_key(),
            debug = state.config.logging.debug,
            log_requests = state.config.logging.log_requests,
            model_aliases = state.models.alias_count(),
            "Bridge listening"
        );

        let prober = UpstreamProber::new(
            state.proxy.client().clone(),
            &state.config.upstream,
            state.config.health,
            state.health.clone(),
            state.metrics.clone(),
        );
        coordinator.register_task(prober.spawn()).await;

        let trigger = coordinator.clone();
        let signal_task = tokio::spawn(async move {
            let reason = signal.await;
            trigger.trigger_shutdown(&reason).await;
        });

        let router = create_router(state);
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(coordinator.listener_closed());

        let served = tokio::select! {
            result = serve.into_future() => result,
            () = coordinator.completed() => {
                info!("Drain window closed, abandoning open connections");
                Ok(())
            }
        };

        match served {
            Ok(()) => {
                coordinator.completed().await;
                info!("Server stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Server error");
                coordinator.trigger_shutdown("server error").await;
                signal_task.abort();
                Err(ServerError::Serve(e))
            }
        }
    }
}
