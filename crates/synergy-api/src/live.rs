use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::debug;

use synergy_gateway::connection;
use synergy_types::models::Principal;

use crate::state::AppState;

/// `GET /gateway`. The principal was resolved by the auth layer before
/// the upgrade is accepted.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!("Upgrading live channel for {}", principal.id);
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, engine, principal))
}
