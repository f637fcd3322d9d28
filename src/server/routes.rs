//! Router and shared application state.
//!
//! - GET  /api      stream a business idea (auth)
//! - POST /api      stream a visit summary (auth, JSON `Visit` body)
//! - GET  /health
//! - GET  /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::metrics::RelayMetrics;
use crate::relay::Relay;
use crate::server::handlers;
use crate::upstream::CompletionBackend;

/// Application state shared across handlers. Built once at startup.
pub struct AppState {
    /// Upstream completion client.
    pub backend: Arc<dyn CompletionBackend>,
    /// `None` when authentication is disabled.
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    pub relay: Relay,
    pub config: Arc<Config>,
    pub metrics: RelayMetrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        config: Arc<Config>,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            backend,
            verifier,
            relay: Relay::new(config.relay.padding),
            config,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_permissive = state.config.server.cors_permissive;

    Router::new()
        .route("/api", get(handlers::idea).post(handlers::consultation))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(cors_permissive.then(CorsLayer::permissive)),
        )
        .with_state(state)
}
