use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use synergy_types::draft::ValidatedDraft;
use synergy_types::models::{
    Attachment, DELETED_PLACEHOLDER, DeliveryStatus, Message, MessageContent,
    MessageKind, MessagePage, Reaction, ReadOutcome, ReadReceipt,
};

use crate::Database;
use crate::conversations::{load_required, record_new_message, refresh_preview, reset_unread};
use crate::error::{Result, StoreError};
use crate::models::{
    AttachmentRow, MESSAGE_COLUMNS, MessageRow, ReactionRow, ReadRow, parse_ts, parse_uuid, ts,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Clamp raw paging input: pages are 1-based, sizes fall back to the
/// default and never exceed the cap.
pub fn normalize_page(page: Option<u32>, page_size: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let size = match page_size {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    };
    (page, size)
}

impl Database {
    /// Persist a validated draft and update the conversation aggregate in
    /// the same transaction.
    ///
    /// Returns the stored message and `true` when it was inserted. A
    /// repeated `clientMessageId` from the same sender returns the original
    /// message and `false`, leaving counters untouched.
    pub fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        draft: ValidatedDraft,
    ) -> Result<(Message, bool)> {
        let cid = conversation_id.to_string();
        let sid = sender_id.to_string();

        self.with_tx(|conn| {
            let conversation = load_required(conn, &cid)?;
            if !conversation.is_active_participant(sender_id) {
                return Err(StoreError::Forbidden(
                    "not an active participant of this conversation".into(),
                ));
            }

            if draft.content.is_tombstone() {
                return Err(StoreError::InvalidArgument("deleted content cannot be sent".into()));
            }
            let kind = draft.content.kind();
            match kind {
                MessageKind::File if !conversation.settings.allow_file_sharing => {
                    return Err(StoreError::Forbidden(
                        "file sharing is disabled in this conversation".into(),
                    ));
                }
                MessageKind::Voice if !conversation.settings.allow_voice_messages => {
                    return Err(StoreError::Forbidden(
                        "voice messages are disabled in this conversation".into(),
                    ));
                }
                _ => {}
            }

            if let Some(key) = draft.client_message_id.as_deref() {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND sender_id = ?2 AND client_message_id = ?3"
                );
                let existing = conn
                    .query_row(&sql, params![cid, sid, key], MessageRow::from_row)
                    .optional()?;
                if let Some(row) = existing {
                    debug!("Duplicate clientMessageId {} from {}", key, sender_id);
                    let message = hydrate(conn, vec![row])?
                        .pop()
                        .ok_or(StoreError::NotFound("message"))?;
                    return Ok((message, false));
                }
            }

            if let Some(reply_to) = draft.reply_to {
                let parent: Option<String> = conn
                    .query_row(
                        "SELECT conversation_id FROM messages WHERE id = ?1",
                        [reply_to.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if parent.as_deref() != Some(cid.as_str()) {
                    return Err(StoreError::InvalidArgument(
                        "replyTo must reference a message in the same conversation".into(),
                    ));
                }
            }

            let message = insert_message(conn, &cid, &sid, draft)?;

            info!(
                "Message {} ({}) stored in {} by {}",
                message.id,
                kind.as_str(),
                conversation_id,
                sender_id
            );
            Ok((message, true))
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Message> {
        self.with_conn(|conn| load_message(conn, &message_id.to_string()))
    }

    /// One page of history, oldest first. Any participant may read,
    /// including one who has since been removed.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage> {
        let (page, page_size) = normalize_page(Some(page), Some(page_size));
        let cid = conversation_id.to_string();

        self.with_conn(|conn| {
            let conversation = load_required(conn, &cid)?;
            if conversation.participant(reader).is_none() {
                return Err(StoreError::Forbidden(
                    "not a participant of this conversation".into(),
                ));
            }

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND is_deleted = 0",
                [&cid],
                |row| row.get(0),
            )?;

            // Newest first with one extra row to detect another page
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let offset = i64::from(page - 1) * i64::from(page_size);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![cid, i64::from(page_size) + 1, offset],
                    MessageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let has_more = rows.len() > page_size as usize;
            rows.truncate(page_size as usize);
            rows.reverse();

            Ok(MessagePage {
                messages: hydrate(conn, rows)?,
                page,
                page_size,
                total: total.max(0) as u64,
                has_more,
            })
        })
    }

    /// Replace the text of a message. Only the sender may edit, only text
    /// messages can be edited, and deleted messages stay deleted.
    pub fn edit_message(&self, message_id: Uuid, editor: Uuid, text: String) -> Result<Message> {
        let mid = message_id.to_string();
        self.with_tx(|conn| {
            let row = load_row(conn, &mid)?;
            if row.is_deleted {
                return Err(StoreError::Forbidden("deleted messages cannot be edited".into()));
            }
            if parse_uuid("message.sender_id", &row.sender_id)? != editor {
                return Err(StoreError::Forbidden("only the sender can edit a message".into()));
            }
            if row.kind()? != MessageKind::Text {
                return Err(StoreError::Forbidden("only text messages can be edited".into()));
            }

            conn.execute(
                "UPDATE messages SET body = ?2, is_edited = 1, edited_at = ?3 WHERE id = ?1",
                params![mid, text, ts(Utc::now())],
            )?;

            let message = load_message(conn, &mid)?;
            refresh_preview(conn, &message)?;
            debug!("Message {} edited", message_id);
            Ok(message)
        })
    }

    /// Tombstone a message. The flag is false when it was already deleted.
    pub fn soft_delete_message(&self, message_id: Uuid, requester: Uuid) -> Result<(Message, bool)> {
        let mid = message_id.to_string();
        self.with_tx(|conn| {
            let row = load_row(conn, &mid)?;
            if parse_uuid("message.sender_id", &row.sender_id)? != requester {
                return Err(StoreError::Forbidden("only the sender can delete a message".into()));
            }
            if row.is_deleted {
                return Ok((load_message(conn, &mid)?, false));
            }

            conn.execute("DELETE FROM attachments WHERE message_id = ?1", [&mid])?;
            conn.execute(
                "UPDATE messages SET is_deleted = 1, deleted_at = ?2, body = ?3 WHERE id = ?1",
                params![mid, ts(Utc::now()), DELETED_PLACEHOLDER],
            )?;

            let message = load_message(conn, &mid)?;
            refresh_preview(conn, &message)?;
            info!("Message {} deleted by {}", message_id, requester);
            Ok((message, true))
        })
    }

    /// Record read receipts for everything the reader has not yet read,
    /// promote fully-read messages to `read`, and reset the reader's
    /// unread counter. Calling it again with nothing new returns no ids.
    pub fn mark_many_read(&self, conversation_id: Uuid, reader: Uuid) -> Result<ReadOutcome> {
        let cid = conversation_id.to_string();
        let rid = reader.to_string();

        self.with_tx(|conn| {
            let conversation = load_required(conn, &cid)?;
            if conversation.participant(reader).is_none() {
                return Err(StoreError::Forbidden(
                    "not a participant of this conversation".into(),
                ));
            }

            let mut stmt = conn.prepare(
                "SELECT id FROM messages m
                 WHERE m.conversation_id = ?1 AND m.sender_id != ?2
                   AND NOT EXISTS (SELECT 1 FROM message_reads r
                                   WHERE r.message_id = m.id AND r.principal_id = ?2)
                 ORDER BY m.created_at, m.seq",
            )?;
            let unread = stmt
                .query_map(params![cid, rid], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let now = Utc::now();
            let read_at = ts(now);
            let mut insert = conn.prepare(
                "INSERT OR IGNORE INTO message_reads (message_id, principal_id, read_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            let mut promote = conn.prepare(&format!(
                "UPDATE messages SET delivery_status = 'read'
                 WHERE id = ?1 AND delivery_status != 'read' AND {FULLY_READ}"
            ))?;

            let mut message_ids = Vec::with_capacity(unread.len());
            for id in &unread {
                insert.execute(params![id, rid, read_at])?;
                promote.execute([id])?;
                message_ids.push(parse_uuid("message.id", id)?);
            }

            reset_unread(conn, conversation_id, reader, now)?;

            if !message_ids.is_empty() {
                debug!(
                    "{} read {} messages in {}",
                    reader,
                    message_ids.len(),
                    conversation_id
                );
            }
            Ok(ReadOutcome {
                message_ids,
                read_at: now,
            })
        })
    }

    /// Advance `sent` to `delivered`. Never moves a message backwards.
    pub fn mark_delivered(&self, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET delivery_status = 'delivered'
                 WHERE id = ?1 AND delivery_status = 'sent'",
                [message_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    /// Tombstone every message older than its conversation's retention
    /// window. Returns how many messages were deleted.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_tx(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, auto_delete_after_days FROM conversations
                 WHERE auto_delete_enabled = 1",
            )?;
            let policies = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let deleted_at = ts(now);
            let mut purged = 0;
            for (cid, days) in policies {
                let cutoff = ts(now - Duration::days(i64::from(days)));

                conn.execute(
                    "DELETE FROM attachments WHERE message_id IN (
                         SELECT id FROM messages
                         WHERE conversation_id = ?1 AND is_deleted = 0 AND created_at < ?2)",
                    params![cid, cutoff],
                )?;
                let n = conn.execute(
                    "UPDATE messages SET is_deleted = 1, deleted_at = ?3, body = ?4
                     WHERE conversation_id = ?1 AND is_deleted = 0 AND created_at < ?2",
                    params![cid, cutoff, deleted_at, DELETED_PLACEHOLDER],
                )?;
                if n > 0 {
                    conn.execute(
                        "UPDATE conversations SET last_message_preview = ?2
                         WHERE id = ?1 AND last_message_id IN (
                             SELECT id FROM messages WHERE conversation_id = ?1 AND is_deleted = 1)",
                        params![cid, DELETED_PLACEHOLDER],
                    )?;
                    debug!("Retention removed {} messages from {}", n, cid);
                }
                purged += n;
            }
            Ok(purged)
        })
    }
}

/// Insert a message that already passed the sender and settings checks,
/// then update the conversation aggregate.
pub(crate) fn insert_message(conn: &Connection, cid: &str, sid: &str, draft: ValidatedDraft) -> Result<Message> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, kind, body, reply_to,
                               client_message_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            cid,
            sid,
            draft.content.kind().as_str(),
            draft.content.body(),
            draft.reply_to.map(|r| r.to_string()),
            draft.client_message_id,
            ts(Utc::now()),
        ],
    )
    .map_err(|e| StoreError::from_write(e, "message"))?;

    for (position, a) in draft.content.attachments().iter().enumerate() {
        conn.execute(
            "INSERT INTO attachments (message_id, position, kind, file_name, storage_uri,
                                      byte_size, mime_type, duration_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                position as i64,
                a.kind.as_str(),
                a.file_name,
                a.storage_uri,
                i64::try_from(a.byte_size).unwrap_or(i64::MAX),
                a.mime_type,
                a.duration_seconds,
            ],
        )?;
    }

    let message = load_message(conn, &id.to_string())?;
    record_new_message(conn, &message)?;
    Ok(message)
}

/// Every active participant other than the sender holds a receipt.
const FULLY_READ: &str = "NOT EXISTS (
    SELECT 1 FROM conversation_participants cp
    WHERE cp.conversation_id = messages.conversation_id
      AND cp.is_active = 1
      AND cp.principal_id != messages.sender_id
      AND NOT EXISTS (SELECT 1 FROM message_reads r
                      WHERE r.message_id = messages.id
                        AND r.principal_id = cp.principal_id))";

/// Re-check every not-yet-read message in a conversation after its
/// active membership shrank.
pub(crate) fn promote_fully_read(conn: &Connection, conversation_id: &str) -> Result<usize> {
    let n = conn.execute(
        &format!(
            "UPDATE messages SET delivery_status = 'read'
             WHERE conversation_id = ?1 AND delivery_status != 'read' AND {FULLY_READ}"
        ),
        [conversation_id],
    )?;
    Ok(n)
}

pub(crate) fn load_row(conn: &Connection, id: &str) -> Result<MessageRow> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], MessageRow::from_row)
        .optional()?
        .ok_or(StoreError::NotFound("message"))
}

fn load_message(conn: &Connection, id: &str) -> Result<Message> {
    let row = load_row(conn, id)?;
    hydrate(conn, vec![row])?
        .pop()
        .ok_or(StoreError::NotFound("message"))
}

/// Attach attachments, reactions and receipts to message rows with one
/// query per child table.
fn hydrate(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut attachments = attachments_for(conn, &ids)?;
    let mut reactions = reactions_for(conn, &ids)?;
    let mut reads = reads_for(conn, &ids)?;

    rows.into_iter()
        .map(|row| {
            let a = attachments.remove(&row.id).unwrap_or_default();
            let r = reactions.remove(&row.id).unwrap_or_default();
            let rb = reads.remove(&row.id).unwrap_or_default();
            row.into_message(a, r, rb)
        })
        .collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn attachments_for(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Vec<Attachment>>> {
    let mut out: HashMap<String, Vec<Attachment>> = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }

    let sql = format!(
        "SELECT message_id, kind, file_name, storage_uri, byte_size, mime_type, duration_seconds
         FROM attachments WHERE message_id IN ({})
         ORDER BY message_id, position",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(AttachmentRow {
                message_id: row.get(0)?,
                kind: row.get(1)?,
                file_name: row.get(2)?,
                storage_uri: row.get(3)?,
                byte_size: row.get(4)?,
                mime_type: row.get(5)?,
                duration_seconds: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for row in rows {
        let key = row.message_id.clone();
        out.entry(key).or_default().push(row.into_attachment()?);
    }
    Ok(out)
}

pub(crate) fn reactions_for(
    conn: &Connection,
    ids: &[String],
) -> Result<HashMap<String, Vec<Reaction>>> {
    let mut out: HashMap<String, Vec<Reaction>> = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }

    let sql = format!(
        "SELECT message_id, principal_id, emoji FROM reactions
         WHERE message_id IN ({})
         ORDER BY message_id, created_at, rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                principal_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for row in rows {
        out.entry(row.message_id).or_default().push(Reaction {
            emoji: row.emoji,
            user_id: parse_uuid("reaction.principal_id", &row.principal_id)?,
        });
    }
    Ok(out)
}

fn reads_for(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Vec<ReadReceipt>>> {
    let mut out: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }

    let sql = format!(
        "SELECT message_id, principal_id, read_at FROM message_reads
         WHERE message_id IN ({})
         ORDER BY message_id, read_at, rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(ReadRow {
                message_id: row.get(0)?,
                principal_id: row.get(1)?,
                read_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for row in rows {
        out.entry(row.message_id).or_default().push(ReadReceipt {
            user_id: parse_uuid("read.principal_id", &row.principal_id)?,
            read_at: parse_ts("read.read_at", &row.read_at)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use synergy_types::draft::MessageDraft;
    use synergy_types::models::{AttachmentKind, PrincipalRole};

    struct Fixture {
        db: Database,
        ada: Uuid,
        bob: Uuid,
        conversation: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let ada = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.upsert_principal(ada, "ada", PrincipalRole::Regular).unwrap();
        db.upsert_principal(bob, "bob", PrincipalRole::Regular).unwrap();
        let conversation = db.get_or_create_direct(ada, bob).unwrap().id;
        Fixture {
            db,
            ada,
            bob,
            conversation,
        }
    }

    fn send(f: &Fixture, sender: Uuid, text: &str) -> Message {
        let draft = MessageDraft::text(text).validate().unwrap();
        f.db.create_message(f.conversation, sender, draft).unwrap().0
    }

    fn file_draft() -> ValidatedDraft {
        ValidatedDraft {
            content: MessageContent::File(vec![Attachment {
                kind: AttachmentKind::File,
                file_name: "deck.pdf".into(),
                storage_uri: "s3://uploads/deck.pdf".into(),
                byte_size: 1024,
                mime_type: "application/pdf".into(),
                duration_seconds: None,
            }]),
            reply_to: None,
            client_message_id: None,
        }
    }

    #[test]
    fn send_updates_aggregate() {
        let f = fixture();
        let msg = send(&f, f.ada, "hello");

        let conv = f.db.get_conversation(f.conversation).unwrap();
        let last = conv.last_message.as_ref().unwrap();
        assert_eq!(last.message_id, msg.id);
        assert_eq!(last.content_preview, "hello");
        assert_eq!(conv.unread_for(f.bob), 1);
        assert_eq!(conv.unread_for(f.ada), 0);
        assert_eq!(msg.delivery_status, DeliveryStatus::Sent);
    }

    #[test]
    fn client_message_id_deduplicates() {
        let f = fixture();
        let mut draft = MessageDraft::text("once");
        draft.client_message_id = Some("c-1".into());

        let (first, created) = f
            .db
            .create_message(f.conversation, f.ada, draft.clone().validate().unwrap())
            .unwrap();
        assert!(created);
        let (second, created) = f
            .db
            .create_message(f.conversation, f.ada, draft.validate().unwrap())
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let conv = f.db.get_conversation(f.conversation).unwrap();
        assert_eq!(conv.unread_for(f.bob), 1);
    }

    #[test]
    fn outsider_cannot_send() {
        let f = fixture();
        let eve = Uuid::new_v4();
        f.db.upsert_principal(eve, "eve", PrincipalRole::Regular).unwrap();
        let draft = MessageDraft::text("hi").validate().unwrap();
        let err = f.db.create_message(f.conversation, eve, draft).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[test]
    fn reply_must_stay_in_conversation() {
        let f = fixture();
        let mut draft = MessageDraft::text("re");
        draft.reply_to = Some(Uuid::new_v4());
        let err = f
            .db
            .create_message(f.conversation, f.ada, draft.validate().unwrap())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let parent = send(&f, f.bob, "question");
        let mut draft = MessageDraft::text("answer");
        draft.reply_to = Some(parent.id);
        let (reply, _) = f
            .db
            .create_message(f.conversation, f.ada, draft.validate().unwrap())
            .unwrap();
        assert_eq!(reply.reply_to, Some(parent.id));
    }

    #[test]
    fn file_sharing_setting_is_enforced() {
        let f = fixture();
        let mut settings = f.db.get_conversation(f.conversation).unwrap().settings;
        settings.allow_file_sharing = false;
        f.db.update_settings(f.conversation, &settings).unwrap();

        let err = f
            .db
            .create_message(f.conversation, f.ada, file_draft())
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[test]
    fn file_messages_cannot_be_edited() {
        let f = fixture();
        let (msg, _) = f.db.create_message(f.conversation, f.ada, file_draft()).unwrap();
        assert_eq!(msg.content.attachments().len(), 1);

        let err = f.db.edit_message(msg.id, f.ada, "x".into()).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
        let stored = f.db.get_message(msg.id).unwrap();
        assert!(!stored.is_edited);
    }

    #[test]
    fn only_sender_edits() {
        let f = fixture();
        let msg = send(&f, f.ada, "draft");
        assert!(matches!(
            f.db.edit_message(msg.id, f.bob, "hijack".into()),
            Err(StoreError::Forbidden(_))
        ));

        let edited = f.db.edit_message(msg.id, f.ada, "final".into()).unwrap();
        assert!(edited.is_edited);
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.content, MessageContent::Text("final".into()));

        let conv = f.db.get_conversation(f.conversation).unwrap();
        assert_eq!(conv.last_message.unwrap().content_preview, "final");
    }

    #[test]
    fn delete_tombstones_and_blocks_edit() {
        let f = fixture();
        let (msg, _) = f.db.create_message(f.conversation, f.ada, file_draft()).unwrap();

        assert!(matches!(
            f.db.soft_delete_message(msg.id, f.bob),
            Err(StoreError::Forbidden(_))
        ));

        let (deleted, changed) = f.db.soft_delete_message(msg.id, f.ada).unwrap();
        assert!(changed);
        assert!(deleted.is_deleted);
        assert_eq!(deleted.content, MessageContent::Deleted(MessageKind::File));
        assert!(deleted.content.attachments().is_empty());

        let (_, changed) = f.db.soft_delete_message(msg.id, f.ada).unwrap();
        assert!(!changed);

        assert!(matches!(
            f.db.edit_message(msg.id, f.ada, "back".into()),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn pages_are_ascending_with_has_more() {
        let f = fixture();
        for i in 0..5 {
            send(&f, f.ada, &format!("m{i}"));
        }
        let deleted = send(&f, f.ada, "gone");
        f.db.soft_delete_message(deleted.id, f.ada).unwrap();

        let newest = f.db.list_messages(f.conversation, f.bob, 1, 4).unwrap();
        assert_eq!(newest.messages.len(), 4);
        assert!(newest.has_more);
        assert_eq!(newest.total, 5);
        assert_eq!(newest.messages[0].content, MessageContent::Text("m2".into()));
        assert!(newest.messages[3].is_deleted);

        let older = f.db.list_messages(f.conversation, f.bob, 2, 4).unwrap();
        assert_eq!(older.messages.len(), 2);
        assert!(!older.has_more);
        assert_eq!(older.messages[0].content, MessageContent::Text("m0".into()));
    }

    #[test]
    fn normalize_page_clamps() {
        assert_eq!(normalize_page(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(normalize_page(Some(0), Some(0)), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(normalize_page(Some(3), Some(1000)), (3, MAX_PAGE_SIZE));
    }

    #[test]
    fn mark_many_read_is_idempotent() {
        let f = fixture();
        let own = send(&f, f.bob, "mine");
        let m1 = send(&f, f.ada, "one");
        let m2 = send(&f, f.ada, "two");

        let outcome = f.db.mark_many_read(f.conversation, f.bob).unwrap();
        assert_eq!(outcome.message_ids, vec![m1.id, m2.id]);

        let conv = f.db.get_conversation(f.conversation).unwrap();
        assert_eq!(conv.unread_for(f.bob), 0);
        assert!(conv.participant(f.bob).unwrap().last_seen_at.is_some());

        let read = f.db.get_message(m1.id).unwrap();
        assert!(read.is_read_by(f.bob));
        assert_eq!(read.delivery_status, DeliveryStatus::Read);
        assert!(!f.db.get_message(own.id).unwrap().is_read_by(f.bob));

        let again = f.db.mark_many_read(f.conversation, f.bob).unwrap();
        assert!(again.message_ids.is_empty());
        assert_eq!(f.db.get_message(m1.id).unwrap().read_by.len(), 1);
    }

    #[test]
    fn delivery_is_monotonic() {
        let f = fixture();
        let msg = send(&f, f.ada, "hi");
        assert!(f.db.mark_delivered(msg.id).unwrap());
        assert!(!f.db.mark_delivered(msg.id).unwrap());

        f.db.mark_many_read(f.conversation, f.bob).unwrap();
        assert!(!f.db.mark_delivered(msg.id).unwrap());
        assert_eq!(
            f.db.get_message(msg.id).unwrap().delivery_status,
            DeliveryStatus::Read
        );
    }

    #[test]
    fn purge_respects_retention_window() {
        let f = fixture();
        let msg = send(&f, f.ada, "old news");

        // Disabled retention never purges
        let later = Utc::now() + Duration::days(400);
        assert_eq!(f.db.purge_expired(later).unwrap(), 0);

        let mut settings = f.db.get_conversation(f.conversation).unwrap().settings;
        settings.auto_delete_enabled = true;
        settings.auto_delete_after_days = 7;
        f.db.update_settings(f.conversation, &settings).unwrap();

        assert_eq!(f.db.purge_expired(Utc::now()).unwrap(), 0);
        assert_eq!(f.db.purge_expired(Utc::now() + Duration::days(8)).unwrap(), 1);

        let purged = f.db.get_message(msg.id).unwrap();
        assert_eq!(purged.content, MessageContent::Deleted(MessageKind::Text));
        let conv = f.db.get_conversation(f.conversation).unwrap();
        assert_eq!(conv.last_message.unwrap().content_preview, DELETED_PLACEHOLDER);
    }
}
