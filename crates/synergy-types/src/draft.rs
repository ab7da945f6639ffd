use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Attachment, AttachmentKind, MessageContent, MessageKind};

pub const MAX_TEXT_CHARS: usize = 5000;
pub const MAX_EMOJI_CHARS: usize = 32;
pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// A message as submitted by a client, before validation.
///
/// Shared by `POST /conversations/{id}/messages` and the live channel's
/// `sendMessage` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

impl MessageDraft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: Some(body.into()),
            attachments: vec![],
            reply_to: None,
            client_message_id: None,
        }
    }

    /// Check the type/content pairing and produce the typed content.
    pub fn validate(self) -> Result<ValidatedDraft, DraftError> {
        let content = match self.kind {
            MessageKind::Text => MessageContent::Text(non_empty_text(self.content)?),
            MessageKind::Emoji => {
                let emoji = self
                    .content
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or(DraftError::MissingEmoji)?;
                if emoji.chars().count() > MAX_EMOJI_CHARS {
                    return Err(DraftError::EmojiTooLong);
                }
                MessageContent::Emoji(emoji)
            }
            MessageKind::System => return Err(DraftError::SystemReserved),
            MessageKind::File => {
                check_attachments(&self.attachments, &[AttachmentKind::File, AttachmentKind::Image])?;
                MessageContent::File(self.attachments)
            }
            MessageKind::Voice => {
                check_attachments(&self.attachments, &[AttachmentKind::Voice])?;
                MessageContent::Voice(self.attachments)
            }
        };

        let client_message_id = match self.client_message_id {
            Some(id) if id.is_empty() || id.len() > MAX_CLIENT_ID_LEN => {
                return Err(DraftError::BadClientMessageId);
            }
            other => other,
        };

        Ok(ValidatedDraft {
            content,
            reply_to: self.reply_to,
            client_message_id,
        })
    }
}

/// Draft whose content already satisfies the type/content pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDraft {
    pub content: MessageContent,
    pub reply_to: Option<Uuid>,
    pub client_message_id: Option<String>,
}

impl ValidatedDraft {
    /// Server-authored notice (participant joined, left, ...).
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: MessageContent::System(text.into()),
            reply_to: None,
            client_message_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("text messages require non-empty content")]
    EmptyText,

    #[error("text exceeds {} characters", MAX_TEXT_CHARS)]
    TextTooLong,

    #[error("emoji messages require an emoji")]
    MissingEmoji,

    #[error("emoji exceeds {} characters", MAX_EMOJI_CHARS)]
    EmojiTooLong,

    #[error("system messages cannot be sent by clients")]
    SystemReserved,

    #[error("at least one attachment is required")]
    MissingAttachment,

    #[error("at most {} attachments are allowed", MAX_ATTACHMENTS)]
    TooManyAttachments,

    #[error("attachment {0} is incomplete")]
    IncompleteAttachment(usize),

    #[error("attachment {0} has the wrong type for this message")]
    AttachmentKindMismatch(usize),

    #[error("attachment {0} has an invalid duration")]
    InvalidDuration(usize),

    #[error("clientMessageId must be 1-{} bytes", MAX_CLIENT_ID_LEN)]
    BadClientMessageId,
}

/// Validate replacement text for an edit.
pub fn validate_edit_text(text: &str) -> Result<String, DraftError> {
    non_empty_text(Some(text.to_string()))
}

fn non_empty_text(content: Option<String>) -> Result<String, DraftError> {
    let text = content.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(DraftError::EmptyText);
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(DraftError::TextTooLong);
    }
    Ok(text)
}

fn check_attachments(attachments: &[Attachment], allowed: &[AttachmentKind]) -> Result<(), DraftError> {
    if attachments.is_empty() {
        return Err(DraftError::MissingAttachment);
    }
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(DraftError::TooManyAttachments);
    }
    for (i, a) in attachments.iter().enumerate() {
        if a.file_name.trim().is_empty() || a.storage_uri.trim().is_empty() || a.mime_type.trim().is_empty() {
            return Err(DraftError::IncompleteAttachment(i));
        }
        if !allowed.contains(&a.kind) {
            return Err(DraftError::AttachmentKindMismatch(i));
        }
        if let Some(d) = a.duration_seconds {
            if !d.is_finite() || d <= 0.0 {
                return Err(DraftError::InvalidDuration(i));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_clip() -> Attachment {
        Attachment {
            kind: AttachmentKind::Voice,
            file_name: "memo.ogg".into(),
            storage_uri: "uploads/memo.ogg".into(),
            byte_size: 2048,
            mime_type: "audio/ogg".into(),
            duration_seconds: Some(3.5),
        }
    }

    #[test]
    fn text_draft_validates() {
        let v = MessageDraft::text("hello").validate().unwrap();
        assert_eq!(v.content, MessageContent::Text("hello".into()));
    }

    #[test]
    fn blank_text_is_rejected() {
        assert_eq!(MessageDraft::text("   ").validate(), Err(DraftError::EmptyText));
    }

    #[test]
    fn emoji_requires_content() {
        let draft = MessageDraft {
            kind: MessageKind::Emoji,
            content: None,
            attachments: vec![],
            reply_to: None,
            client_message_id: None,
        };
        assert_eq!(draft.validate(), Err(DraftError::MissingEmoji));
    }

    #[test]
    fn voice_requires_attachment() {
        let mut draft = MessageDraft {
            kind: MessageKind::Voice,
            content: None,
            attachments: vec![],
            reply_to: None,
            client_message_id: None,
        };
        assert_eq!(draft.clone().validate(), Err(DraftError::MissingAttachment));

        draft.attachments.push(voice_clip());
        let v = draft.validate().unwrap();
        assert_eq!(v.content.attachments().len(), 1);
    }

    #[test]
    fn file_message_rejects_voice_attachment() {
        let draft = MessageDraft {
            kind: MessageKind::File,
            content: None,
            attachments: vec![voice_clip()],
            reply_to: None,
            client_message_id: None,
        };
        assert_eq!(draft.validate(), Err(DraftError::AttachmentKindMismatch(0)));
    }

    #[test]
    fn clients_cannot_send_system_messages() {
        let mut draft = MessageDraft::text("maintenance tonight");
        draft.kind = MessageKind::System;
        assert_eq!(draft.validate(), Err(DraftError::SystemReserved));
    }

    #[test]
    fn draft_deserializes_from_camel_case() {
        let draft: MessageDraft = serde_json::from_value(serde_json::json!({
            "type": "text",
            "content": "hi",
            "clientMessageId": "c-1"
        }))
        .unwrap();
        assert_eq!(draft.kind, MessageKind::Text);
        assert_eq!(draft.client_message_id.as_deref(), Some("c-1"));
    }
}
