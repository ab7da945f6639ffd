use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use synergy_types::api::ToggleReactionRequest;
use synergy_types::models::Principal;

use crate::error::{ApiError, Payload};
use crate::state::AppState;

/// Toggle and return the message's full reaction list.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reactions = state
        .engine
        .react(principal.id, message_id, req.emoji)
        .await?;
    Ok(Json(reactions))
}
