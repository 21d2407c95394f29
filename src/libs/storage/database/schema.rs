use rusqlite::Connection;

use crate::libs::storage::storage_traits::StoreError;

/// Idempotent schema pass, run once when the store opens.
///
/// The `UNIQUE (participant_low, participant_high)` index is what enforces
/// at-most-one conversation per unordered pair: both orderings of a pair are
/// stored canonically (lower uuid first), so a concurrent duplicate insert
/// fails with a constraint violation that find-or-create resolves by
/// refetching the winner.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id  TEXT PRIMARY KEY,
            participant_low  TEXT NOT NULL,
            participant_high TEXT NOT NULL,
            role_low         TEXT NOT NULL CHECK (role_low IN ('staff', 'client')),
            role_high        TEXT NOT NULL CHECK (role_high IN ('staff', 'client')),
            subject          TEXT,
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL,

            UNIQUE (participant_low, participant_high)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_low
            ON conversations (participant_low, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conversations_high
            ON conversations (participant_high, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            message_id      TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id),
            sender_id       TEXT NOT NULL,
            receiver_id     TEXT,
            content         TEXT NOT NULL,
            reply_to        TEXT REFERENCES messages(message_id),
            seq             INTEGER NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,

            UNIQUE (conversation_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages (conversation_id, created_at, seq);
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages (conversation_id, sender_id) WHERE is_read = 0;

        CREATE TABLE IF NOT EXISTS notifications (
            notification_id TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            body            TEXT NOT NULL,
            entity_ref      TEXT,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications (user_id, created_at DESC);
        "#,
    )?;
    Ok(())
}
