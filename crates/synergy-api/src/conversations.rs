use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use synergy_types::api::{
    AddParticipantRequest, CreateGroupRequest, NotificationsRequest, OpenDirectRequest,
    UpdateSettingsRequest,
};
use synergy_types::models::Principal;

use crate::error::{ApiError, Payload};
use crate::state::AppState;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.engine.list_conversations(principal.id).await?;
    Ok(Json(conversations))
}

pub async fn open_direct(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<OpenDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .engine
        .open_direct(principal.id, req.participant_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .engine
        .create_group(principal.id, req.name, req.participant_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.mark_read(principal.id, conversation_id).await?;
    Ok(Json(outcome))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .engine
        .update_settings(principal.id, conversation_id, req)
        .await?;
    Ok(Json(conversation))
}

pub async fn set_notifications(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<NotificationsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .set_notifications(principal.id, conversation_id, req.enabled)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<AddParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .engine
        .add_participant(principal.id, conversation_id, req.principal_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((conversation_id, principal_id)): Path<(Uuid, Uuid)>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .engine
        .remove_participant(principal.id, conversation_id, principal_id)
        .await?;
    Ok(Json(conversation))
}
