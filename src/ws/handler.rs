//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use super::connection::run_connection;
use super::upgrade::UpgradeInfo;
use crate::app_state::AppState;

/// `GET /ws`: Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let info = UpgradeInfo::from_headers(&headers);
    let gateway = Arc::clone(&state.gateway);

    ws.on_upgrade(move |socket| run_connection(socket, gateway, info))
}
