//! Administrative endpoints: batched directive push.

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{RefreshRequest, RefreshResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};
use crate::service::{DirectiveBroadcast, DirectivePlan};

/// Header carrying the administrative token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// `POST /admin/refresh`: Push a directive to every live connection.
///
/// The push runs in the background; the response reports its size.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthorized`] on a missing or wrong token and
/// [`GatewayError::InvalidRequest`] on a zero batch size or bad command.
#[utoipa::path(
    post,
    path = "/admin/refresh",
    tag = "Admin",
    summary = "Push a directive to all connections",
    description = "Sends `c <command>` to every live connection in batches, pausing `delay_ms` after each connection and `batch_delay_ms` after each batch.",
    request_body = RefreshRequest,
    responses(
        (status = 202, description = "Push started", body = RefreshResponse),
        (status = 400, description = "Invalid batch parameters", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin token", body = ErrorResponse),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    authorize(&state, &headers)?;

    let plan = DirectivePlan::new(
        req.command,
        req.batch_size,
        Duration::from_millis(req.batch_delay_ms),
        Duration::from_millis(req.delay_ms),
    )?;
    let command = plan.command.clone();
    let broadcast = DirectiveBroadcast::prepare(&state.gateway.registry, plan);
    let response = RefreshResponse {
        command,
        connections: broadcast.connections(),
        batches: broadcast.batch_count(),
    };
    tracing::info!(
        command = %response.command,
        connections = response.connections,
        batches = response.batches,
        "directive push accepted"
    );
    tokio::spawn(broadcast.run());

    Ok((StatusCode::ACCEPTED, Json(response)))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented == Some(expected) {
        Ok(())
    } else {
        tracing::warn!("admin request rejected");
        Err(GatewayError::Unauthorized)
    }
}

/// Admin routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/refresh", post(refresh))
}
