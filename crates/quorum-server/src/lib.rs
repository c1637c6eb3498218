//! HTTP surface for the Quorum orchestrator
//!
//! Exposes the pipeline over JSON and SSE endpoints with correlation-id
//! echoing, plus a health endpoint reporting provider state.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod correlation;
mod health;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use quorum_config::Config;
use quorum_orchestrator::Orchestrator;

/// Shared state for route handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub include_confidence: bool,
}

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if orchestrator initialization fails
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let include_confidence = config.synthesis.include_confidence;
        let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

        let state = AppState {
            orchestrator,
            include_confidence,
        };

        let mut app = Router::new()
            .route("/api/orchestrate", axum::routing::post(routes::orchestrate))
            .route("/api/orchestrate/stream", axum::routing::post(routes::orchestrate_stream));

        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
        }

        let app = app
            .with_state(state)
            .layer(axum::middleware::from_fn(correlation::correlation_middleware));

        Ok(Self {
            router: app,
            listen_address,
        })
    }

    /// Get the configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
