//! REST interface to the published overlay

pub mod handlers;
pub mod service;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use service::{AppState, OverlayService};

pub fn router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/status", get(handlers::get_status))
        // Overlay
        .route("/api/v1/overlay", get(handlers::get_overlay))
        .route("/api/v1/overlay/:service/:level", get(handlers::get_layer))
        .route("/api/v1/legend", get(handlers::get_legend))
        // Geography
        .route("/api/v1/locate", get(handlers::locate))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
