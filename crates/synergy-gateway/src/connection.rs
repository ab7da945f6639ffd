use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use synergy_types::events::{ClientCommand, ErrorPayload, ServerEvent};
use synergy_types::models::Principal;

use crate::engine::Engine;
use crate::error::MessagingError;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one authenticated live connection until either side goes away.
///
/// The credential was validated before the upgrade, so the session starts
/// straight away with `ready`.
pub async fn handle_connection(socket: WebSocket, engine: Engine, principal: Principal) {
    let (mut sender, mut receiver) = socket.split();

    // The router holds the only strong sender; when a newer connection
    // replaces this route the receiver closes and this session ends.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let reply_tx = tx.downgrade();
    let conn_id = engine.connect(&principal, tx).await;

    info!(
        "{} ({}) connected to gateway",
        principal.display_name, principal.id
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward routed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = rx.recv() => {
                    let Some(event) = result else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, one at a time
    let engine_recv = engine.clone();
    let principal_recv = principal.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        let failure =
                            handle_command(&engine_recv, &principal_recv, cmd).await;
                        if let Some(event) = failure {
                            // Errors go to this connection only
                            match reply_tx.upgrade() {
                                Some(tx) => {
                                    let _ = tx.send(event);
                                }
                                None => break,
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            principal_recv.display_name,
                            principal_recv.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        if let Some(tx) = reply_tx.upgrade() {
                            let _ = tx.send(ServerEvent::MessageError(ErrorPayload {
                                message: format!("malformed command: {e}"),
                                code: "INVALID_ARGUMENT".into(),
                                client_message_id: None,
                            }));
                        }
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    engine.disconnect(principal.id, conn_id).await;
    info!(
        "{} ({}) disconnected from gateway",
        principal.display_name, principal.id
    );
}

/// Execute one command. Returns the error event for the originating
/// connection when the command fails.
async fn handle_command(
    engine: &Engine,
    principal: &Principal,
    cmd: ClientCommand,
) -> Option<ServerEvent> {
    let user_id = principal.id;

    match cmd {
        ClientCommand::JoinConversation { conversation_id } => {
            match engine.join_conversation(user_id, conversation_id).await {
                Ok(_) => {
                    debug!("{} joined {}", user_id, conversation_id);
                    None
                }
                Err(e) => Some(conversation_error(&e)),
            }
        }

        ClientCommand::LeaveConversation { conversation_id } => {
            engine.leave_conversation(user_id, conversation_id).await;
            None
        }

        ClientCommand::SendMessage {
            conversation_id,
            draft,
        } => {
            let client_message_id = draft.client_message_id.clone();
            match engine.send_message(user_id, conversation_id, draft).await {
                Ok(_) => None,
                Err(e) => {
                    log_failure("sendMessage", user_id, &e);
                    Some(ServerEvent::MessageError(e.payload(client_message_id)))
                }
            }
        }

        ClientCommand::TypingStart { conversation_id } => {
            match engine.typing_start(user_id, conversation_id).await {
                Ok(()) => None,
                Err(e) => Some(conversation_error(&e)),
            }
        }

        ClientCommand::TypingStop { conversation_id } => {
            engine.typing_stop(user_id, conversation_id).await;
            None
        }

        ClientCommand::AddReaction { message_id, emoji } => {
            match engine.react(user_id, message_id, emoji).await {
                Ok(_) => None,
                Err(e) => {
                    log_failure("addReaction", user_id, &e);
                    Some(ServerEvent::ReactionError(e.payload(None)))
                }
            }
        }

        ClientCommand::MarkAsRead { conversation_id } => {
            match engine.mark_read(user_id, conversation_id).await {
                Ok(_) => None,
                Err(e) => {
                    log_failure("markAsRead", user_id, &e);
                    Some(ServerEvent::ReadError(e.payload(None)))
                }
            }
        }

        ClientCommand::UpdateStatus { status } => match engine.update_status(user_id, status).await {
            Ok(()) => None,
            Err(e) => Some(conversation_error(&e)),
        },
    }
}

fn conversation_error(err: &MessagingError) -> ServerEvent {
    ServerEvent::ConversationError(err.payload(None))
}

fn log_failure(command: &str, user_id: Uuid, err: &MessagingError) {
    match err {
        MessagingError::Internal(detail) => warn!("{} from {} failed: {}", command, user_id, detail),
        other => debug!("{} from {} rejected: {}", command, user_id, other),
    }
}
