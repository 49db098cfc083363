//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod backup;
mod cascade;
mod connection;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Dropping a timed-out request drops the in-flight backup or cascade test with it
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(TimeoutLayer::new(settings.server.request_timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))

        // Connection routes
        .route(
            "/api/connections",
            post(connection::connect).get(connection::list_connections),
        )
        .route("/api/connections/{id}", delete(connection::disconnect))

        // Backup and restore against a live connection
        .route("/api/connections/{id}/backups", post(backup::create_backup))
        .route(
            "/api/connections/{id}/backups/{backup_id}/restore",
            post(backup::restore_backup),
        )
        .route("/api/connections/{id}/cascade-tests", post(cascade::run_cascade_test))

        // Stored backups
        .route("/api/backups", get(backup::list_backups))
        .route("/api/backups/transient", delete(backup::prune_transient))
        .route("/api/backups/{backup_id}", get(backup::get_backup))
        .route("/api/backups/{backup_id}/validation", get(backup::validate_backup))
        .route("/api/integrity-report", get(backup::integrity_report))
        .route("/api/stats", get(backup::stats))

        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
