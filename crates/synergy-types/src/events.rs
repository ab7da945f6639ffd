use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::draft::MessageDraft;
use crate::models::{Conversation, Message, PresenceStatus, Reaction};

/// Events sent from the server over the live channel.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Handshake accepted
    Ready { user_id: Uuid, display_name: String },

    /// A message was persisted in one of the recipient's conversations
    NewMessage(Message),

    /// A message reached an online recipient (sent back to the author only)
    MessageDelivered {
        message_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
        delivered_at: DateTime<Utc>,
    },

    /// Post-edit state of a message
    MessageEdited(Message),

    /// Post-delete state of a message (tombstoned content)
    MessageDeleted(Message),

    UserTyping {
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// Full reaction set after a toggle
    ReactionUpdated {
        message_id: Uuid,
        conversation_id: Uuid,
        reactions: Vec<Reaction>,
    },

    MessagesRead {
        user_id: Uuid,
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    UserStatusUpdate { user_id: Uuid, status: PresenceStatus },

    /// Participants or settings changed
    ConversationUpdated(Conversation),

    MessageError(ErrorPayload),
    ReactionError(ErrorPayload),
    ReadError(ErrorPayload),
    ConversationError(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewMessage(_) => "newMessage",
            Self::MessageDelivered { .. } => "messageDelivered",
            Self::MessageEdited(_) => "messageEdited",
            Self::MessageDeleted(_) => "messageDeleted",
            Self::UserTyping { .. } => "userTyping",
            Self::ReactionUpdated { .. } => "reactionUpdated",
            Self::MessagesRead { .. } => "messagesRead",
            Self::UserStatusUpdate { .. } => "userStatusUpdate",
            Self::ConversationUpdated(_) => "conversationUpdated",
            Self::MessageError(_) => "messageError",
            Self::ReactionError(_) => "reactionError",
            Self::ReadError(_) => "readError",
            Self::ConversationError(_) => "conversationError",
        }
    }
}

/// Body of the per-operation error events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Commands sent FROM client TO server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinConversation { conversation_id: Uuid },

    LeaveConversation { conversation_id: Uuid },

    SendMessage {
        conversation_id: Uuid,
        #[serde(flatten)]
        draft: MessageDraft,
    },

    TypingStart { conversation_id: Uuid },

    TypingStop { conversation_id: Uuid },

    /// Toggles: a second add of the same emoji removes it
    AddReaction { message_id: Uuid, emoji: String },

    MarkAsRead { conversation_id: Uuid },

    UpdateStatus { status: PresenceStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;

    #[test]
    fn typing_event_wire_shape() {
        let user_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let json = serde_json::to_value(ServerEvent::UserTyping {
            user_id,
            conversation_id,
            is_typing: false,
        })
        .unwrap();

        assert_eq!(json["type"], "userTyping");
        assert_eq!(json["data"]["isTyping"], false);
        assert_eq!(json["data"]["conversationId"], conversation_id.to_string());
    }

    #[test]
    fn send_message_command_flattens_draft() {
        let conversation_id = Uuid::new_v4();
        let cmd: ClientCommand = serde_json::from_value(serde_json::json!({
            "type": "sendMessage",
            "data": {
                "conversationId": conversation_id,
                "type": "text",
                "content": "hello"
            }
        }))
        .unwrap();

        match cmd {
            ClientCommand::SendMessage { conversation_id: c, draft } => {
                assert_eq!(c, conversation_id);
                assert_eq!(draft.kind, MessageKind::Text);
                assert_eq!(draft.content.as_deref(), Some("hello"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn error_event_omits_missing_client_id() {
        let json = serde_json::to_value(ServerEvent::ReadError(ErrorPayload {
            message: "not a participant".into(),
            code: "FORBIDDEN".into(),
            client_message_id: None,
        }))
        .unwrap();
        assert_eq!(json["type"], "readError");
        assert!(json["data"].get("clientMessageId").is_none());
    }
}
