use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use synergy_types::api::EditMessageRequest;
use synergy_types::draft::MessageDraft;
use synergy_types::models::Principal;

use crate::error::{ApiError, Payload};
use crate::state::AppState;

/// 1-based paging; the store applies the default and cap.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .engine
        .list_messages(principal.id, conversation_id, query.page, query.page_size)
        .await?;
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(draft): Payload<MessageDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .engine
        .send_message(principal.id, conversation_id, draft)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Payload(req): Payload<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .engine
        .edit_message(principal.id, message_id, req.text)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_message(principal.id, message_id).await?;
    Ok(StatusCode::OK)
}
