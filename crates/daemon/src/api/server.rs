/// API Server implementation

use super::handlers::*;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Build the router with all endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Node endpoints
        .route("/api/status", get(get_status))
        // Link stack endpoints
        .route("/api/messages", post(send_message))
        .route("/api/ping", post(send_ping))
        // Add CORS middleware (allow local browser tools)
        .layer(CorsLayer::permissive())
        // Add shared state
        .with_state(state)
}

/// API Server for exposing node status and message submission
pub struct ApiServer {
    listen_addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(listen_addr: SocketAddr, state: AppState) -> Self {
        Self { listen_addr, state }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = router(self.state);

        info!("API server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        Ok(())
    }
}
