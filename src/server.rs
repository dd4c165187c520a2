//! HTTP server and routes

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::clusters::ClusterRegistry;
use crate::error::Error;
use crate::handlers::{list_clusters, shell_handler};
use crate::relay::registry::ConnectionRegistry;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Cluster name resolution
    pub clusters: ClusterRegistry,
    /// Live relay sockets, for diagnostics
    pub connections: ConnectionRegistry,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/v1/clusters", get(list_clusters))
        // Shell WebSocket upgrade route
        .route(
            "/api/v1/clusters/{cluster}/namespaces/{namespace}/pods/{pod}/shell",
            get(shell_handler),
        )
        .with_state(state)
}

/// Start the console API server and serve until the listener fails.
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<(), Error> {
    let app = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("bind {addr}: {e}")))?;
    info!(addr = %addr, "starting console API server");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))
}
