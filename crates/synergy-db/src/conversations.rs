use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use synergy_types::draft::ValidatedDraft;
use synergy_types::models::{
    Conversation, ConversationKind, ConversationSettings, Message, Participant, ParticipantRole,
};

use crate::Database;
use crate::error::{Result, StoreError};
use crate::messages::{insert_message, promote_fully_read};
use crate::models::{CONVERSATION_COLUMNS, ConversationRow, PARTICIPANT_COLUMNS, ParticipantRow, ts};
use crate::principals::require_active_principal;

pub const MAX_GROUP_NAME_CHARS: usize = 100;
pub const MAX_AUTO_DELETE_DAYS: u32 = 3650;

/// Unordered pair key: both argument orders produce the same string.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

impl Database {
    // -- Creation --

    /// Find the direct conversation for this pair, creating it if needed.
    ///
    /// The UNIQUE `direct_key` column makes the insert a no-op for every
    /// caller but the first, so concurrent calls from both sides converge
    /// on one record. A previously deactivated record is revived.
    pub fn get_or_create_direct(&self, initiator: Uuid, other: Uuid) -> Result<Conversation> {
        if initiator == other {
            return Err(StoreError::InvalidOperation(
                "cannot open a direct conversation with yourself".into(),
            ));
        }
        let key = direct_key(initiator, other);

        self.with_tx(|conn| {
            require_active_principal(conn, initiator)?;
            require_active_principal(conn, other)?;

            let now = ts(Utc::now());
            let candidate = Uuid::new_v4().to_string();
            let inserted = conn
                .execute(
                    "INSERT INTO conversations (id, kind, direct_key, created_by, created_at, updated_at)
                     VALUES (?1, 'direct', ?2, ?3, ?4, ?4)
                     ON CONFLICT(direct_key) DO NOTHING",
                    params![candidate, key, initiator.to_string(), now],
                )
                .map_err(|e| StoreError::from_write(e, "direct conversation"))?;

            let id: String = conn.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                [&key],
                |row| row.get(0),
            )?;

            if inserted == 1 {
                insert_participant(conn, &id, initiator, 0, ParticipantRole::Member, &now)?;
                insert_participant(conn, &id, other, 1, ParticipantRole::Member, &now)?;
                info!("Created direct conversation {} ({} <-> {})", id, initiator, other);
            } else {
                let revived = conn.execute(
                    "UPDATE conversations SET is_active = 1, updated_at = ?2 WHERE id = ?1 AND is_active = 0",
                    params![id, now],
                )?;
                if revived > 0 {
                    conn.execute(
                        "UPDATE conversation_participants SET is_active = 1 WHERE conversation_id = ?1",
                        [&id],
                    )?;
                    info!("Reactivated direct conversation {}", id);
                }
            }

            load_required(conn, &id)
        })
    }

    /// Create a group. The creator becomes its admin; duplicate and
    /// self-references in `members` are ignored.
    pub fn create_group(&self, creator: Uuid, name: Option<&str>, members: &[Uuid]) -> Result<Conversation> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if name.is_some_and(|n| n.chars().count() > MAX_GROUP_NAME_CHARS) {
            return Err(StoreError::InvalidArgument(format!(
                "group name exceeds {MAX_GROUP_NAME_CHARS} characters"
            )));
        }

        let mut others: Vec<Uuid> = Vec::with_capacity(members.len());
        for m in members {
            if *m != creator && !others.contains(m) {
                others.push(*m);
            }
        }
        if others.is_empty() {
            return Err(StoreError::InvalidArgument(
                "a group needs at least one other participant".into(),
            ));
        }

        self.with_tx(|conn| {
            require_active_principal(conn, creator)?;
            for m in &others {
                require_active_principal(conn, *m)?;
            }

            let id = Uuid::new_v4().to_string();
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO conversations (id, kind, name, created_by, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?3, ?4, ?4)",
                params![id, name, creator.to_string(), now],
            )?;

            insert_participant(conn, &id, creator, 0, ParticipantRole::Admin, &now)?;
            for (i, m) in others.iter().enumerate() {
                insert_participant(conn, &id, *m, i as i64 + 1, ParticipantRole::Member, &now)?;
            }

            info!("Created group {} with {} participants", id, others.len() + 1);
            load_required(conn, &id)
        })
    }

    // -- Queries --

    pub fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.with_conn(|conn| load_required(conn, &id.to_string()))
    }

    /// Active conversations the principal actively participates in, most
    /// recent activity first.
    pub fn list_conversations_for(&self, principal_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let pid = principal_id.to_string();

            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE is_active = 1 AND id IN (
                     SELECT conversation_id FROM conversation_participants
                     WHERE principal_id = ?1 AND is_active = 1)
                 ORDER BY COALESCE(last_message_at, created_at) DESC, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&pid], ConversationRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // One query for every participant list (avoids N+1)
            let sql = format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants cp
                 LEFT JOIN principals p ON p.id = cp.principal_id
                 WHERE cp.conversation_id IN (
                     SELECT conversation_id FROM conversation_participants
                     WHERE principal_id = ?1 AND is_active = 1)
                 ORDER BY cp.conversation_id, cp.position"
            );
            let mut stmt = conn.prepare(&sql)?;
            let participant_rows = stmt
                .query_map([&pid], ParticipantRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut by_conversation: HashMap<String, Vec<Participant>> = HashMap::new();
            for row in participant_rows {
                let key = row.conversation_id.clone();
                by_conversation
                    .entry(key)
                    .or_default()
                    .push(row.into_participant()?);
            }

            rows.into_iter()
                .map(|row| {
                    let participants = by_conversation.remove(&row.id).unwrap_or_default();
                    row.into_conversation(participants)
                })
                .collect()
        })
    }

    // -- Mutations --

    /// Add (or re-add) a principal to a group. The flag is false when the
    /// principal was already active and nothing changed.
    pub fn add_participant(&self, conversation_id: Uuid, principal_id: Uuid) -> Result<(Conversation, bool)> {
        let cid = conversation_id.to_string();
        self.with_tx(|conn| {
            let conversation = load_required(conn, &cid)?;
            if conversation.kind != ConversationKind::Group {
                return Err(StoreError::InvalidOperation(
                    "participants can only be added to group conversations".into(),
                ));
            }
            require_active_principal(conn, principal_id)?;

            let now = ts(Utc::now());
            let changed = match conversation.participant(principal_id) {
                Some(p) if p.is_active => false,
                Some(_) => {
                    conn.execute(
                        "UPDATE conversation_participants
                         SET is_active = 1, unread_count = 0, joined_at = ?3, role = 'member'
                         WHERE conversation_id = ?1 AND principal_id = ?2",
                        params![cid, principal_id.to_string(), now],
                    )?;
                    true
                }
                None => {
                    let position: i64 = conn.query_row(
                        "SELECT COALESCE(MAX(position), -1) + 1 FROM conversation_participants
                         WHERE conversation_id = ?1",
                        [&cid],
                        |row| row.get(0),
                    )?;
                    insert_participant(conn, &cid, principal_id, position, ParticipantRole::Member, &now)?;
                    true
                }
            };

            if changed {
                touch(conn, &cid, &now)?;
            }
            Ok((load_required(conn, &cid)?, changed))
        })
    }

    /// Soft-remove a participant: they keep their history but stop
    /// receiving fan-out. The longest-standing member is promoted when the
    /// last admin leaves; a group with nobody left is deactivated.
    ///
    /// `notice` is an `(author, text)` system message stored in the same
    /// transaction, before the author could lose the right to post.
    pub fn remove_participant(
        &self,
        conversation_id: Uuid,
        principal_id: Uuid,
        notice: Option<(Uuid, String)>,
    ) -> Result<(Conversation, Option<Message>)> {
        let cid = conversation_id.to_string();
        let pid = principal_id.to_string();
        self.with_tx(|conn| {
            let conversation = load_required(conn, &cid)?;
            if conversation.kind != ConversationKind::Group {
                return Err(StoreError::InvalidOperation(
                    "participants cannot leave a direct conversation".into(),
                ));
            }
            if !conversation.is_active_participant(principal_id) {
                return Err(StoreError::NotFound("participant"));
            }

            let posted = match notice {
                Some((author, text)) => {
                    if !conversation.is_active_participant(author) {
                        return Err(StoreError::Forbidden(
                            "not an active participant of this conversation".into(),
                        ));
                    }
                    let draft = ValidatedDraft::system(text);
                    Some(insert_message(conn, &cid, &author.to_string(), draft)?)
                }
                None => None,
            };

            let now = ts(Utc::now());
            conn.execute(
                "UPDATE conversation_participants SET is_active = 0, unread_count = 0
                 WHERE conversation_id = ?1 AND principal_id = ?2",
                params![cid, pid],
            )?;

            let (active, admins): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(role = 'admin'), 0) FROM conversation_participants
                 WHERE conversation_id = ?1 AND is_active = 1",
                [&cid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            if active == 0 {
                conn.execute(
                    "UPDATE conversations SET is_active = 0 WHERE id = ?1",
                    [&cid],
                )?;
                info!("Group {} has no participants left, deactivated", cid);
            } else {
                let promoted = promote_fully_read(conn, &cid)?;
                if promoted > 0 {
                    debug!("{} messages in {} now read by every participant", promoted, cid);
                }
                if admins == 0 {
                    conn.execute(
                        "UPDATE conversation_participants SET role = 'admin'
                         WHERE conversation_id = ?1 AND principal_id = (
                             SELECT principal_id FROM conversation_participants
                             WHERE conversation_id = ?1 AND is_active = 1
                             ORDER BY position LIMIT 1)",
                        [&cid],
                    )?;
                }
            }

            touch(conn, &cid, &now)?;
            Ok((load_required(conn, &cid)?, posted))
        })
    }

    pub fn update_settings(&self, conversation_id: Uuid, settings: &ConversationSettings) -> Result<Conversation> {
        if settings.auto_delete_after_days == 0 || settings.auto_delete_after_days > MAX_AUTO_DELETE_DAYS {
            return Err(StoreError::InvalidArgument(format!(
                "autoDeleteAfterDays must be between 1 and {MAX_AUTO_DELETE_DAYS}"
            )));
        }

        let cid = conversation_id.to_string();
        self.with_tx(|conn| {
            let n = conn.execute(
                "UPDATE conversations
                 SET allow_file_sharing = ?2, allow_voice_messages = ?3,
                     auto_delete_enabled = ?4, auto_delete_after_days = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    cid,
                    settings.allow_file_sharing,
                    settings.allow_voice_messages,
                    settings.auto_delete_enabled,
                    settings.auto_delete_after_days,
                    ts(Utc::now()),
                ],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound("conversation"));
            }
            load_required(conn, &cid)
        })
    }

    pub fn set_notifications(&self, conversation_id: Uuid, principal_id: Uuid, enabled: bool) -> Result<()> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE conversation_participants SET notifications_enabled = ?3
                 WHERE conversation_id = ?1 AND principal_id = ?2 AND is_active = 1",
                params![conversation_id.to_string(), principal_id.to_string(), enabled],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound("participant"));
            }
            Ok(())
        })
    }
}

fn insert_participant(
    conn: &Connection,
    conversation_id: &str,
    principal_id: Uuid,
    position: i64,
    role: ParticipantRole,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, principal_id, position, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![conversation_id, principal_id.to_string(), position, role.as_str(), now],
    )
    .map_err(|e| StoreError::from_write(e, "participant"))?;
    Ok(())
}

fn touch(conn: &Connection, conversation_id: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        params![conversation_id, now],
    )?;
    Ok(())
}

pub(crate) fn load_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    let Some(row) = conn
        .query_row(&sql, [id], ConversationRow::from_row)
        .optional()?
    else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants cp
         LEFT JOIN principals p ON p.id = cp.principal_id
         WHERE cp.conversation_id = ?1
         ORDER BY cp.position"
    );
    let mut stmt = conn.prepare(&sql)?;
    let participants = stmt
        .query_map([id], ParticipantRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(ParticipantRow::into_participant)
        .collect::<Result<Vec<_>>>()?;

    row.into_conversation(participants).map(Some)
}

pub(crate) fn load_required(conn: &Connection, id: &str) -> Result<Conversation> {
    load_conversation(conn, id)?.ok_or(StoreError::NotFound("conversation"))
}

/// Conversation side of a send: cache the preview and bump every other
/// active participant's unread counter. Runs inside the send transaction.
pub(crate) fn record_new_message(conn: &Connection, message: &Message) -> Result<()> {
    let cid = message.conversation_id.to_string();
    let sender = message.sender_id.to_string();
    let at = ts(message.created_at);

    conn.execute(
        "UPDATE conversations
         SET last_message_id = ?2, last_message_preview = ?3, last_message_sender = ?4,
             last_message_at = ?5, updated_at = ?5
         WHERE id = ?1",
        params![cid, message.id.to_string(), message.content.preview(), sender, at],
    )?;

    let bumped = conn.execute(
        "UPDATE conversation_participants SET unread_count = unread_count + 1
         WHERE conversation_id = ?1 AND principal_id != ?2 AND is_active = 1",
        params![cid, sender],
    )?;
    debug!("Message {} bumped unread for {} participants", message.id, bumped);
    Ok(())
}

/// Refresh the cached preview if `message` is the conversation's latest.
pub(crate) fn refresh_preview(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_message_preview = ?3
         WHERE id = ?1 AND last_message_id = ?2",
        params![
            message.conversation_id.to_string(),
            message.id.to_string(),
            message.content.preview()
        ],
    )?;
    Ok(())
}

pub(crate) fn reset_unread(
    conn: &Connection,
    conversation_id: Uuid,
    principal_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE conversation_participants SET unread_count = 0, last_seen_at = ?3
         WHERE conversation_id = ?1 AND principal_id = ?2",
        params![conversation_id.to_string(), principal_id.to_string(), ts(now)],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound("participant"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use synergy_types::draft::MessageDraft;
    use synergy_types::models::{DeliveryStatus, PrincipalRole};

    fn db_with(names: &[&str]) -> (Database, Vec<Uuid>) {
        let db = Database::open_in_memory().unwrap();
        let ids = names
            .iter()
            .map(|n| {
                let id = Uuid::new_v4();
                db.upsert_principal(id, n, PrincipalRole::Regular).unwrap();
                id
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn direct_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_key(a, b), direct_key(b, a));
    }

    #[test]
    fn get_or_create_direct_is_idempotent() {
        let (db, ids) = db_with(&["ada", "bob"]);
        let first = db.get_or_create_direct(ids[0], ids[1]).unwrap();
        let again = db.get_or_create_direct(ids[0], ids[1]).unwrap();
        let reversed = db.get_or_create_direct(ids[1], ids[0]).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, reversed.id);
        assert_eq!(first.kind, ConversationKind::Direct);
        assert_eq!(first.created_by, ids[0]);
        assert_eq!(first.participants.len(), 2);
        assert_eq!(first.participants[1].display_name, "bob");
    }

    #[test]
    fn direct_with_self_is_invalid() {
        let (db, ids) = db_with(&["ada"]);
        let err = db.get_or_create_direct(ids[0], ids[0]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[test]
    fn direct_with_unknown_principal_is_not_found() {
        let (db, ids) = db_with(&["ada"]);
        let err = db.get_or_create_direct(ids[0], Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound("principal")));
    }

    #[test]
    fn group_creator_is_admin() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db
            .create_group(ids[0], Some("Founders"), &[ids[1], ids[2], ids[1], ids[0]])
            .unwrap();

        assert_eq!(group.name.as_deref(), Some("Founders"));
        assert_eq!(group.participants.len(), 3);
        assert!(group.is_admin(ids[0]));
        assert!(!group.is_admin(ids[1]));
    }

    #[test]
    fn group_requires_another_member() {
        let (db, ids) = db_with(&["ada"]);
        let err = db.create_group(ids[0], None, &[ids[0]]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn removed_participant_drops_out_of_listing() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db.create_group(ids[0], None, &[ids[1], ids[2]]).unwrap();

        let (after, _) = db.remove_participant(group.id, ids[2], None).unwrap();
        assert!(!after.is_active_participant(ids[2]));
        assert!(after.participant(ids[2]).is_some());
        assert!(db.list_conversations_for(ids[2]).unwrap().is_empty());
        assert_eq!(db.list_conversations_for(ids[1]).unwrap().len(), 1);
    }

    #[test]
    fn last_admin_leaving_promotes_next_member() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db.create_group(ids[0], None, &[ids[1], ids[2]]).unwrap();

        let (after, _) = db.remove_participant(group.id, ids[0], None).unwrap();
        assert!(after.is_admin(ids[1]));
    }

    #[test]
    fn removing_the_last_reader_completes_read_state() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db.create_group(ids[0], None, &[ids[1], ids[2]]).unwrap();
        let draft = MessageDraft::text("agenda").validate().unwrap();
        let (message, _) = db.create_message(group.id, ids[0], draft).unwrap();

        db.mark_many_read(group.id, ids[1]).unwrap();
        assert_eq!(db.get_message(message.id).unwrap().delivery_status, DeliveryStatus::Sent);

        db.remove_participant(group.id, ids[2], None).unwrap();
        assert_eq!(db.get_message(message.id).unwrap().delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn leave_notice_commits_with_the_removal() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db.create_group(ids[0], None, &[ids[1], ids[2]]).unwrap();

        let (after, notice) = db
            .remove_participant(group.id, ids[2], Some((ids[2], "cy left the group".into())))
            .unwrap();
        let notice = notice.unwrap();
        assert_eq!(notice.sender_id, ids[2]);
        assert_eq!(after.last_message.unwrap().message_id, notice.id);

        // A second removal fails and leaves no stray notice behind
        let err = db
            .remove_participant(group.id, ids[2], Some((ids[0], "ada removed cy".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let page = db.list_messages(group.id, ids[0], 1, 50).unwrap();
        assert_eq!(page.messages.len(), 1);
    }

    #[test]
    fn readding_participant_reactivates() {
        let (db, ids) = db_with(&["ada", "bob", "cy"]);
        let group = db.create_group(ids[0], None, &[ids[1], ids[2]]).unwrap();
        db.remove_participant(group.id, ids[2], None).unwrap();

        let (after, changed) = db.add_participant(group.id, ids[2]).unwrap();
        assert!(changed);
        assert!(after.is_active_participant(ids[2]));

        let (_, changed) = db.add_participant(group.id, ids[2]).unwrap();
        assert!(!changed);
    }

    #[test]
    fn settings_reject_zero_retention() {
        let (db, ids) = db_with(&["ada", "bob"]);
        let conv = db.get_or_create_direct(ids[0], ids[1]).unwrap();
        let settings = ConversationSettings {
            auto_delete_after_days: 0,
            ..ConversationSettings::default()
        };
        assert!(matches!(
            db.update_settings(conv.id, &settings),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
