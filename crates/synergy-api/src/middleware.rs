use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Deserialize;

use synergy_gateway::MessagingError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

fn missing() -> ApiError {
    ApiError(MessagingError::Unauthenticated("missing bearer credential".into()))
}

/// Resolve the `Authorization: Bearer` credential to a principal and store
/// it in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer(req.headers()).ok_or_else(missing)?;
    let principal = state.engine.authenticate(&token).await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Same as [`require_auth`], but browsers cannot set headers on a
/// WebSocket handshake, so `?token=` is accepted too.
pub async fn require_gateway_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer(req.headers()) {
        Some(token) => token,
        None => Query::<TokenQuery>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(missing)?,
    };
    let principal = state.engine.authenticate(&token).await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
