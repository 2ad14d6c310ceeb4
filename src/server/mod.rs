//! HTTP/WebSocket server assembly.

pub mod handlers;

use anyhow::Result;
use axum::middleware;
use axum::routing::{any, get, post};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::registry::PeerRegistry;
use crate::router::Router;
use crate::ws::{self, SignalingHub};

/// Shared server state: the registry and router singletons plus the
/// signaling hub and configuration. Tests construct a fresh one per
/// case.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub router: Arc<Router>,
    pub hub: Arc<SignalingHub>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let router = Arc::new(Router::new(registry.clone()));
        Self {
            registry,
            router,
            hub: Arc::new(SignalingHub::new()),
            config: Arc::new(config),
        }
    }
}

/// Build the application router: HTTP signaling surface plus the two
/// WebSocket endpoints, all behind permissive CORS.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/offer", post(handlers::handle_offer))
        .route("/answer", post(handlers::handle_answer))
        .route("/ice", post(handlers::handle_ice))
        .route("/status", get(handlers::handle_status))
        .route("/health", get(handlers::handle_health))
        .route("/stats", get(handlers::handle_stats))
        .route("/ws/signaling", any(ws::signaling_ws_handler))
        .route("/ws/data", any(ws::data_ws_handler))
        .layer(middleware::from_fn(handlers::cors_middleware))
        .with_state(state)
}

/// Serve until interrupted. Ctrl-C stops admissions and drains every
/// peer; the server exits once connections have observed closure.
pub async fn run(listener: TcpListener, state: AppState) -> Result<()> {
    let registry = state.registry.clone();
    let hub = state.hub.clone();

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, closing peers");
            registry.close_all();
            hub.close_all();
        })
        .await?;

    info!("server stopped");
    Ok(())
}
