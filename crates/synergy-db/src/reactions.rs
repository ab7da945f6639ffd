use chrono::Utc;
use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use synergy_types::draft::MAX_EMOJI_CHARS;
use synergy_types::models::Reaction;

use crate::Database;
use crate::conversations::load_required;
use crate::error::{Result, StoreError};
use crate::messages::{load_row, reactions_for};
use crate::models::{parse_uuid, ts};

impl Database {
    /// Toggle `emoji` for `principal_id` on a message: an existing pair is
    /// removed, otherwise it is added. Returns the message's conversation
    /// and its full reaction list afterwards.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        principal_id: Uuid,
        emoji: &str,
    ) -> Result<(Uuid, Vec<Reaction>)> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(StoreError::InvalidArgument("emoji must not be empty".into()));
        }
        if emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(StoreError::InvalidArgument(format!(
                "emoji exceeds {MAX_EMOJI_CHARS} characters"
            )));
        }

        let mid = message_id.to_string();
        let pid = principal_id.to_string();

        self.with_tx(|conn| {
            let row = load_row(conn, &mid)?;
            if row.is_deleted {
                return Err(StoreError::Forbidden(
                    "reactions on deleted messages cannot change".into(),
                ));
            }

            let conversation = load_required(conn, &row.conversation_id)?;
            if !conversation.is_active_participant(principal_id) {
                return Err(StoreError::Forbidden(
                    "not an active participant of this conversation".into(),
                ));
            }

            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND principal_id = ?2 AND emoji = ?3",
                params![mid, pid, emoji],
            )?;
            if removed == 0 {
                conn.execute(
                    "INSERT INTO reactions (message_id, principal_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![mid, pid, emoji, ts(Utc::now())],
                )
                .map_err(|e| StoreError::from_write(e, "reaction"))?;
            }
            debug!(
                "{} {} reaction {} on {}",
                principal_id,
                if removed == 0 { "added" } else { "removed" },
                emoji,
                message_id
            );

            let reactions = reactions_for(conn, std::slice::from_ref(&mid))?
                .remove(&mid)
                .unwrap_or_default();
            Ok((parse_uuid("message.conversation_id", &row.conversation_id)?, reactions))
        })
    }
}
