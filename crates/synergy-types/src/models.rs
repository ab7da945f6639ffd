use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Fixed text that replaces the content of a soft-deleted message.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Longest preview kept in a conversation's last-message cache.
pub const PREVIEW_MAX_CHARS: usize = 100;

// -- Principals --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    Regular,
    Admin,
}

impl PrincipalRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(Self::Regular),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// An authenticated user as resolved by the identity gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub display_name: String,
    pub role: PrincipalRole,
    pub active: bool,
}

// -- Conversations --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub principal_id: Uuid,
    pub display_name: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub notifications_enabled: bool,
    pub is_active: bool,
    pub unread_count: u32,
}

/// Cached summary of the newest message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: Uuid,
    pub content_preview: String,
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    pub allow_file_sharing: bool,
    pub allow_voice_messages: bool,
    pub auto_delete_enabled: bool,
    pub auto_delete_after_days: u32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            allow_file_sharing: true,
            allow_voice_messages: true,
            auto_delete_enabled: false,
            auto_delete_after_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub participants: Vec<Participant>,
    pub created_by: Uuid,
    pub last_message: Option<LastMessage>,
    pub settings: ConversationSettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn participant(&self, principal_id: Uuid) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.principal_id == principal_id)
    }

    pub fn is_active_participant(&self, principal_id: Uuid) -> bool {
        self.participant(principal_id).is_some_and(|p| p.is_active)
    }

    pub fn is_admin(&self, principal_id: Uuid) -> bool {
        self.participant(principal_id)
            .is_some_and(|p| p.is_active && p.role == ParticipantRole::Admin)
    }

    /// Ids of every participant that still receives fan-out.
    pub fn active_participant_ids(&self) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.principal_id)
            .collect()
    }

    pub fn unread_for(&self, principal_id: Uuid) -> u32 {
        self.participant(principal_id)
            .map(|p| p.unread_count)
            .unwrap_or(0)
    }
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Voice,
    Image,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Voice => "voice",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "voice" => Some(Self::Voice),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// A blob already placed in storage by the upload service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub file_name: String,
    pub storage_uri: String,
    pub byte_size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Storage discriminator for message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
    Voice,
    Emoji,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Voice => "voice",
            Self::Emoji => "emoji",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            "voice" => Some(Self::Voice),
            "emoji" => Some(Self::Emoji),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Message content, discriminated by `type` on the wire.
///
/// A soft-deleted message keeps its original kind in
/// [`MessageContent::Deleted`]; on the wire it still reports that `type`
/// and its `content` is the fixed placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Emoji(String),
    System(String),
    File(Vec<Attachment>),
    Voice(Vec<Attachment>),
    Deleted(MessageKind),
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Emoji(_) => MessageKind::Emoji,
            Self::System(_) => MessageKind::System,
            Self::File(_) => MessageKind::File,
            Self::Voice(_) => MessageKind::Voice,
            Self::Deleted(kind) => *kind,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }

    /// String body for text-like variants and tombstones.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Emoji(s) | Self::System(s) => Some(s),
            Self::Deleted(_) => Some(DELETED_PLACEHOLDER),
            Self::File(_) | Self::Voice(_) => None,
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        match self {
            Self::File(a) | Self::Voice(a) => a,
            _ => &[],
        }
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Text(s) | Self::Emoji(s) | Self::System(s) => truncate_chars(s, PREVIEW_MAX_CHARS),
            Self::Deleted(_) => DELETED_PLACEHOLDER.to_string(),
            Self::File(attachments) => match attachments.first() {
                Some(a) if attachments.len() == 1 => format!("📎 {}", a.file_name),
                _ => format!("📎 {} files", attachments.len()),
            },
            Self::Voice(_) => "🎤 Voice message".to_string(),
        }
    }
}

impl Serialize for MessageContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("MessageContent", 2)?;
        out.serialize_field("type", &self.kind())?;
        match self {
            Self::Text(s) | Self::Emoji(s) | Self::System(s) => out.serialize_field("content", s)?,
            Self::File(a) | Self::Voice(a) => out.serialize_field("content", a)?,
            Self::Deleted(_) => out.serialize_field("content", DELETED_PLACEHOLDER)?,
        }
        out.end()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// Coarse delivery state. Variants are ordered so transitions can be
/// checked with `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Outbound only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(flatten)]
    pub content: MessageContent,
    pub reactions: Vec<Reaction>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub read_by: Vec<ReadReceipt>,
    pub reply_to: Option<Uuid>,
    pub delivery_status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read_by(&self, principal_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == principal_id)
    }
}

/// One page of a conversation's history, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: u32,
    pub page_size: u32,
    /// Number of messages that are not deleted.
    pub total: u64,
    pub has_more: bool,
}

/// Result of marking a conversation read for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    /// Messages that gained a read receipt in this call.
    pub message_ids: Vec<Uuid>,
    pub read_at: DateTime<Utc>,
}

// -- Presence --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str) -> Attachment {
        Attachment {
            kind: AttachmentKind::File,
            file_name: name.to_string(),
            storage_uri: format!("s3://bucket/{name}"),
            byte_size: 42,
            mime_type: "application/pdf".to_string(),
            duration_seconds: None,
        }
    }

    #[test]
    fn content_serializes_with_type_tag() {
        let json = serde_json::to_value(MessageContent::Emoji("🎉".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "emoji", "content": "🎉" }));
    }

    #[test]
    fn message_flattens_content() {
        let msg = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: MessageContent::Text("hello".into()),
            reactions: vec![],
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            read_by: vec![],
            reply_to: None,
            delivery_status: DeliveryStatus::Sent,
            client_message_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["deliveryStatus"], "sent");
        assert!(json.get("clientMessageId").is_none());
    }

    #[test]
    fn tombstone_keeps_the_original_type() {
        let content = MessageContent::Deleted(MessageKind::File);
        assert_eq!(content.kind(), MessageKind::File);
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "file", "content": DELETED_PLACEHOLDER })
        );
        assert_eq!(content.preview(), DELETED_PLACEHOLDER);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "a".repeat(150);
        let preview = MessageContent::Text(long).preview();
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS + 1);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn preview_describes_attachments() {
        assert_eq!(
            MessageContent::File(vec![attachment("deck.pdf")]).preview(),
            "📎 deck.pdf"
        );
        assert_eq!(
            MessageContent::File(vec![attachment("a"), attachment("b")]).preview(),
            "📎 2 files"
        );
    }

    #[test]
    fn delivery_status_is_ordered() {
        assert!(DeliveryStatus::Read > DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered > DeliveryStatus::Sent);
    }
}
