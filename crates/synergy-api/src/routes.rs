use axum::{
    Json, Router, middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use serde_json::json;

use crate::middleware::{require_auth, require_gateway_auth};
use crate::state::AppState;
use crate::{conversations, live, messages, reactions};

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every HTTP and live-channel route. Cross-cutting layers (CORS, tracing)
/// are added by the binary.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::open_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route(
            "/conversations/{conversation_id}/settings",
            patch(conversations::update_settings),
        )
        .route(
            "/conversations/{conversation_id}/notifications",
            put(conversations::set_notifications),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(conversations::add_participant),
        )
        .route(
            "/conversations/{conversation_id}/participants/{principal_id}",
            delete(conversations::remove_participant),
        )
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(live::ws_upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), require_gateway_auth))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .merge(ws_route)
}
