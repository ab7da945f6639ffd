use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial messaging schema)");
        conn.execute_batch(
            "
            CREATE TABLE principals (
                id              TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'regular',
                active          INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id                      TEXT PRIMARY KEY,
                kind                    TEXT NOT NULL,
                -- sorted 'a:b' pair for direct conversations, NULL for groups
                direct_key              TEXT UNIQUE,
                name                    TEXT,
                created_by              TEXT NOT NULL REFERENCES principals(id),
                last_message_id         TEXT,
                last_message_preview    TEXT,
                last_message_sender     TEXT,
                last_message_at         TEXT,
                allow_file_sharing      INTEGER NOT NULL DEFAULT 1,
                allow_voice_messages    INTEGER NOT NULL DEFAULT 1,
                auto_delete_enabled     INTEGER NOT NULL DEFAULT 0,
                auto_delete_after_days  INTEGER NOT NULL DEFAULT 30,
                is_active               INTEGER NOT NULL DEFAULT 1,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE TABLE conversation_participants (
                conversation_id         TEXT NOT NULL REFERENCES conversations(id),
                principal_id            TEXT NOT NULL REFERENCES principals(id),
                position                INTEGER NOT NULL,
                role                    TEXT NOT NULL,
                joined_at               TEXT NOT NULL,
                last_seen_at            TEXT,
                notifications_enabled   INTEGER NOT NULL DEFAULT 1,
                is_active               INTEGER NOT NULL DEFAULT 1,
                unread_count            INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                PRIMARY KEY (conversation_id, principal_id)
            );

            CREATE INDEX idx_participants_principal
                ON conversation_participants(principal_id, is_active);

            CREATE TABLE messages (
                seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
                id                  TEXT NOT NULL UNIQUE,
                conversation_id     TEXT NOT NULL REFERENCES conversations(id),
                sender_id           TEXT NOT NULL REFERENCES principals(id),
                kind                TEXT NOT NULL,
                body                TEXT,
                reply_to            TEXT,
                client_message_id   TEXT,
                is_edited           INTEGER NOT NULL DEFAULT 0,
                edited_at           TEXT,
                is_deleted          INTEGER NOT NULL DEFAULT 0,
                deleted_at          TEXT,
                delivery_status     TEXT NOT NULL DEFAULT 'sent',
                created_at          TEXT NOT NULL,
                UNIQUE (conversation_id, sender_id, client_message_id)
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            CREATE TABLE attachments (
                message_id          TEXT NOT NULL REFERENCES messages(id),
                position            INTEGER NOT NULL,
                kind                TEXT NOT NULL,
                file_name           TEXT NOT NULL,
                storage_uri         TEXT NOT NULL,
                byte_size           INTEGER NOT NULL,
                mime_type           TEXT NOT NULL,
                duration_seconds    REAL,
                PRIMARY KEY (message_id, position)
            );

            CREATE TABLE reactions (
                message_id      TEXT NOT NULL REFERENCES messages(id),
                principal_id    TEXT NOT NULL REFERENCES principals(id),
                emoji           TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (message_id, principal_id, emoji)
            );

            CREATE TABLE message_reads (
                message_id      TEXT NOT NULL REFERENCES messages(id),
                principal_id    TEXT NOT NULL REFERENCES principals(id),
                read_at         TEXT NOT NULL,
                PRIMARY KEY (message_id, principal_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
