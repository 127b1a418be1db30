//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Application routes are handed to `serve()`, so they can be
//! built from the module's [`ContextStore`] after construction.

use std::future::Future;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use flowctx_core::ContextStore;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, AppState};
use super::middleware::build_http_layers;

/// Manages the HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- creates the process-wide context store
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    store: ContextStore,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            store: ContextStore::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns a handle to the context store every request is bound through.
    #[must_use]
    pub fn store(&self) -> ContextStore {
        self.store.clone()
    }

    /// Assembles the router: health routes plus `app`, all behind the HTTP
    /// middleware stack.
    ///
    /// Routes:
    /// - `GET /health` -- flow statistics JSON
    /// - `GET /health/live` -- liveness probe
    pub fn build_router(&self, app: Router) -> Router {
        let state = AppState {
            store: self.store.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .with_state(state)
            .merge(app)
            .layer(build_http_layers(&self.config, &self.store))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves `app` until the shutdown signal fires, then waits for
    /// in-flight requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// encounters a fatal I/O error.
    pub async fn serve(
        mut self,
        app: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router(app);

        info!("Serving HTTP connections");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!(
            total_flows = self.store.total_flows(),
            "Server stopped"
        );
        Ok(())
    }
}
