//! REST API layer: route handlers, DTOs, router composition and the
//! OpenAPI document.
//!
//! The WebSocket endpoint lives in [`crate::ws`]; this module only carries
//! the operational HTTP surface.

pub mod dto;
pub mod handlers;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI description of the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "fanout-gateway", description = "Pub/sub to WebSocket gateway"),
    paths(handlers::system::health_handler, handlers::admin::refresh),
    components(schemas(
        dto::HealthResponse,
        dto::RefreshRequest,
        dto::RefreshResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Health"),
        (name = "Admin", description = "Operator commands"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
}

/// Builds the full application: REST routes, the `/ws` endpoint and the
/// HTTP layers, bound to `state`.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
