//! Database row types and their decoding into domain models.
//! Rows hold raw SQLite values so decoding errors surface as
//! [`StoreError::Corrupt`] instead of panics.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use synergy_types::models::{
    Attachment, AttachmentKind, Conversation, ConversationKind, ConversationSettings,
    DeliveryStatus, LastMessage, Message, MessageContent, MessageKind, Participant,
    ParticipantRole, Reaction, ReadReceipt,
};

use crate::error::{Result, StoreError};

/// Fixed-width UTC timestamp so lexical order matches time order.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            field,
            value: value.to_string(),
        })
}

fn parse_opt_ts(field: &'static str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(field, v)).transpose()
}

pub fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid> {
    value.parse().map_err(|_| StoreError::Corrupt {
        field,
        value: value.to_string(),
    })
}

fn corrupt(field: &'static str, value: &str) -> StoreError {
    StoreError::Corrupt {
        field,
        value: value.to_string(),
    }
}

// -- Conversations --

pub const CONVERSATION_COLUMNS: &str = "id, kind, name, created_by, last_message_id, \
     last_message_preview, last_message_sender, last_message_at, allow_file_sharing, \
     allow_voice_messages, auto_delete_enabled, auto_delete_after_days, is_active, \
     created_at, updated_at";

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub created_by: String,
    pub last_message_id: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<String>,
    pub allow_file_sharing: bool,
    pub allow_voice_messages: bool,
    pub auto_delete_enabled: bool,
    pub auto_delete_after_days: u32,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationRow {
    /// Reads the columns listed in [`CONVERSATION_COLUMNS`], in order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            created_by: row.get(3)?,
            last_message_id: row.get(4)?,
            last_message_preview: row.get(5)?,
            last_message_sender: row.get(6)?,
            last_message_at: row.get(7)?,
            allow_file_sharing: row.get(8)?,
            allow_voice_messages: row.get(9)?,
            auto_delete_enabled: row.get(10)?,
            auto_delete_after_days: row.get(11)?,
            is_active: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    pub fn into_conversation(self, participants: Vec<Participant>) -> Result<Conversation> {
        let last_message = match (
            self.last_message_id,
            self.last_message_preview,
            self.last_message_sender,
            self.last_message_at,
        ) {
            (Some(id), Some(preview), Some(sender), Some(at)) => Some(LastMessage {
                message_id: parse_uuid("last_message_id", &id)?,
                content_preview: preview,
                sender_id: parse_uuid("last_message_sender", &sender)?,
                timestamp: parse_ts("last_message_at", &at)?,
            }),
            _ => None,
        };

        Ok(Conversation {
            id: parse_uuid("conversation.id", &self.id)?,
            kind: ConversationKind::parse(&self.kind)
                .ok_or_else(|| corrupt("conversation.kind", &self.kind))?,
            name: self.name,
            participants,
            created_by: parse_uuid("created_by", &self.created_by)?,
            last_message,
            settings: ConversationSettings {
                allow_file_sharing: self.allow_file_sharing,
                allow_voice_messages: self.allow_voice_messages,
                auto_delete_enabled: self.auto_delete_enabled,
                auto_delete_after_days: self.auto_delete_after_days,
            },
            is_active: self.is_active,
            created_at: parse_ts("conversation.created_at", &self.created_at)?,
            updated_at: parse_ts("conversation.updated_at", &self.updated_at)?,
        })
    }
}

pub const PARTICIPANT_COLUMNS: &str = "cp.conversation_id, cp.principal_id, \
     COALESCE(p.display_name, 'unknown'), cp.role, cp.joined_at, cp.last_seen_at, \
     cp.notifications_enabled, cp.is_active, cp.unread_count";

pub struct ParticipantRow {
    pub conversation_id: String,
    pub principal_id: String,
    pub display_name: String,
    pub role: String,
    pub joined_at: String,
    pub last_seen_at: Option<String>,
    pub notifications_enabled: bool,
    pub is_active: bool,
    pub unread_count: u32,
}

impl ParticipantRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            conversation_id: row.get(0)?,
            principal_id: row.get(1)?,
            display_name: row.get(2)?,
            role: row.get(3)?,
            joined_at: row.get(4)?,
            last_seen_at: row.get(5)?,
            notifications_enabled: row.get(6)?,
            is_active: row.get(7)?,
            unread_count: row.get(8)?,
        })
    }

    pub fn into_participant(self) -> Result<Participant> {
        Ok(Participant {
            principal_id: parse_uuid("participant.principal_id", &self.principal_id)?,
            display_name: self.display_name,
            role: ParticipantRole::parse(&self.role)
                .ok_or_else(|| corrupt("participant.role", &self.role))?,
            joined_at: parse_ts("participant.joined_at", &self.joined_at)?,
            last_seen_at: parse_opt_ts("participant.last_seen_at", self.last_seen_at.as_deref())?,
            notifications_enabled: self.notifications_enabled,
            is_active: self.is_active,
            unread_count: self.unread_count,
        })
    }
}

// -- Messages --

pub const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, kind, body, reply_to, \
     client_message_id, is_edited, edited_at, is_deleted, deleted_at, delivery_status, created_at";

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String,
    pub body: Option<String>,
    pub reply_to: Option<String>,
    pub client_message_id: Option<String>,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    pub delivery_status: String,
    pub created_at: String,
}

impl MessageRow {
    /// Reads the columns listed in [`MESSAGE_COLUMNS`], in order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            kind: row.get(3)?,
            body: row.get(4)?,
            reply_to: row.get(5)?,
            client_message_id: row.get(6)?,
            is_edited: row.get(7)?,
            edited_at: row.get(8)?,
            is_deleted: row.get(9)?,
            deleted_at: row.get(10)?,
            delivery_status: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    pub fn kind(&self) -> Result<MessageKind> {
        MessageKind::parse(&self.kind).ok_or_else(|| corrupt("message.kind", &self.kind))
    }

    pub fn into_message(
        self,
        attachments: Vec<Attachment>,
        reactions: Vec<Reaction>,
        read_by: Vec<ReadReceipt>,
    ) -> Result<Message> {
        let body = self.body.clone().unwrap_or_default();
        let content = if self.is_deleted {
            MessageContent::Deleted(self.kind()?)
        } else {
            match self.kind()? {
                MessageKind::Text => MessageContent::Text(body),
                MessageKind::Emoji => MessageContent::Emoji(body),
                MessageKind::System => MessageContent::System(body),
                MessageKind::File => MessageContent::File(attachments),
                MessageKind::Voice => MessageContent::Voice(attachments),
            }
        };

        Ok(Message {
            id: parse_uuid("message.id", &self.id)?,
            conversation_id: parse_uuid("message.conversation_id", &self.conversation_id)?,
            sender_id: parse_uuid("message.sender_id", &self.sender_id)?,
            content,
            reactions,
            is_edited: self.is_edited,
            edited_at: parse_opt_ts("message.edited_at", self.edited_at.as_deref())?,
            is_deleted: self.is_deleted,
            deleted_at: parse_opt_ts("message.deleted_at", self.deleted_at.as_deref())?,
            read_by,
            reply_to: self
                .reply_to
                .as_deref()
                .map(|r| parse_uuid("message.reply_to", r))
                .transpose()?,
            delivery_status: DeliveryStatus::parse(&self.delivery_status)
                .ok_or_else(|| corrupt("message.delivery_status", &self.delivery_status))?,
            client_message_id: self.client_message_id,
            created_at: parse_ts("message.created_at", &self.created_at)?,
        })
    }
}

pub struct AttachmentRow {
    pub message_id: String,
    pub kind: String,
    pub file_name: String,
    pub storage_uri: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub duration_seconds: Option<f64>,
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Result<Attachment> {
        Ok(Attachment {
            kind: AttachmentKind::parse(&self.kind)
                .ok_or_else(|| corrupt("attachment.kind", &self.kind))?,
            file_name: self.file_name,
            storage_uri: self.storage_uri,
            byte_size: u64::try_from(self.byte_size)
                .map_err(|_| corrupt("attachment.byte_size", &self.byte_size.to_string()))?,
            mime_type: self.mime_type,
            duration_seconds: self.duration_seconds,
        })
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub principal_id: String,
    pub emoji: String,
}

pub struct ReadRow {
    pub message_id: String,
    pub principal_id: String,
    pub read_at: String,
}
