//! Server assembly for Switchboard
//!
//! Wires the proxy engine, the OAuth endpoints, and the health probe into
//! one axum router and runs it with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use switchboard_config::Config;
use switchboard_oauth::{OauthApi, TokenStore, oauth_router};
use switchboard_proxy::{ProxyState, proxy_router};
use tower_http::trace::TraceLayer;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    state: ProxyState,
}

impl Server {
    /// Build the server from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid or engine
    /// construction fails.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let listen_address = config.listen_address()?;
        let oauth_settings = config.settings.oauth.clone();

        let oauth = Arc::new(TokenStore::new(oauth_settings.clone()));
        if let Err(e) = oauth.load_persisted().await {
            tracing::warn!(error = %e, "could not load persisted oauth tokens, starting empty");
        }

        let state = ProxyState::from_config(config, Arc::clone(&oauth))?;

        let app = Router::new()
            .route("/health", axum::routing::get(health))
            .merge(proxy_router(state.clone()))
            .merge(oauth_router(OauthApi::new(oauth, oauth_settings)))
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
            state,
        })
    }

    /// The configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// The shared proxy state (for hot reload)
    #[must_use]
    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until the cancellation token fires
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener or serving fails.
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "switchboard listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

/// Liveness probe
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
