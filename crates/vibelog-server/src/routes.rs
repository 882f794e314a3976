//! Route configuration for the collector.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CollectorConfig;
use crate::handlers::{
    get_manifest, health_check, ingest, legacy_get_log, legacy_list_resources, mcp_rpc,
};
use crate::state::CollectorState;
use crate::websocket::notifications_upgrade;

/// Create the collector router.
pub fn create_router(state: Arc<CollectorState>) -> Router {
    let cors = build_cors_layer(state.config());
    let body_limit = DefaultBodyLimit::max(state.config().body_limit);

    let mcp_routes = Router::new()
        .route("/manifest.json", get(get_manifest))
        .route("/notifications", get(notifications_upgrade))
        // Pre-JSON-RPC endpoints kept for older clients
        .route("/resources/list", post(legacy_list_resources))
        .route("/tools/get_log", post(legacy_get_log));

    Router::new()
        .route("/health", get(health_check))
        .route("/ingest/{name}", post(ingest))
        .route("/mcp", post(mcp_rpc))
        .nest("/mcp", mcp_routes)
        .with_state(state)
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &CollectorConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
