use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::libs::core::models::{
    Conversation, ConversationId, Message, MessageId, Notification, NotificationId, Participant,
    ParticipantId,
};
use crate::libs::storage::database::schema;
use crate::libs::storage::storage_traits::{
    ConversationStore, MessageStore, MessagingStore, NotificationStore, ReadStateStore, Storage,
    StoreError, Transactional,
};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn_pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`, applies pragmas
    /// on every pooled connection, and runs the schema pass.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = Pool::new(manager)?;
        let conn = pool.get()?;
        schema::run_migrations(&conn)?;
        drop(conn);
        Ok(Self { conn_pool: pool })
    }

    pub fn new_connection(
        &self,
    ) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.conn_pool.get()?)
    }
}

impl Storage for SqliteStore {
    type Transaction<'s>
        = SqliteTransaction<'s>
    where
        Self: 's;
}

pub struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SqliteTransaction<'conn> {
    /// Deferred transaction for read-only work.
    pub fn read(
        conn: &'conn mut PooledConnection<SqliteConnectionManager>,
    ) -> Result<Self, StoreError> {
        let tx = conn.transaction()?;
        Ok(Self { tx })
    }

    /// Immediate transaction for writes. Taking the write lock up front
    /// serializes writers instead of risking a stale read snapshot between
    /// the lookup and the insert.
    pub fn write(
        conn: &'conn mut PooledConnection<SqliteConnectionManager>,
    ) -> Result<Self, StoreError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }
}

impl<'conn> Transactional for SqliteTransaction<'conn> {
    fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit()?)
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(self.tx.rollback()?)
    }
}

impl<'conn> MessagingStore for SqliteTransaction<'conn> {}

fn datetime_from_millis(idx: usize, value: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp {value} out of range").into(),
        )
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        participant_low: Participant {
            id: row.get(1)?,
            role: row.get(3)?,
        },
        participant_high: Participant {
            id: row.get(2)?,
            role: row.get(4)?,
        },
        subject: row.get(5)?,
        created_at: datetime_from_millis(6, row.get(6)?)?,
        updated_at: datetime_from_millis(7, row.get(7)?)?,
    })
}

const CONVERSATION_COLUMNS: &str = "conversation_id, participant_low, participant_high, \
     role_low, role_high, subject, created_at, updated_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        reply_to: row.get(5)?,
        seq: row.get(6)?,
        is_read: row.get(7)?,
        created_at: datetime_from_millis(8, row.get(8)?)?,
    })
}

const MESSAGE_COLUMNS: &str = "message_id, conversation_id, sender_id, receiver_id, content, \
     reply_to, seq, is_read, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        entity_ref: row.get(4)?,
        is_read: row.get(5)?,
        created_at: datetime_from_millis(6, row.get(6)?)?,
    })
}

impl<'conn> ConversationStore for SqliteTransaction<'conn> {
    fn insert_conversation(&mut self, conversation: &Conversation) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO conversations (conversation_id, participant_low, participant_high, \
             role_low, role_high, subject, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id,
                conversation.participant_low.id,
                conversation.participant_high.id,
                conversation.participant_low.role,
                conversation.participant_high.role,
                conversation.subject,
                conversation.created_at.timestamp_millis(),
                conversation.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn conversation_by_pair(
        &mut self,
        low: ParticipantId,
        high: ParticipantId,
    ) -> Result<Option<Conversation>, StoreError> {
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_low = ?1 AND participant_high = ?2"
        );
        Ok(self
            .tx
            .query_row(&query, params![low, high], conversation_from_row)
            .optional()?)
    }

    fn conversation_by_id(
        &mut self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = ?1"
        );
        Ok(self
            .tx
            .query_row(&query, params![id], conversation_from_row)
            .optional()?)
    }

    fn conversations_for_user(
        &mut self,
        user_id: ParticipantId,
    ) -> Result<Vec<Conversation>, StoreError> {
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_low = ?1 OR participant_high = ?1 \
             ORDER BY updated_at DESC, conversation_id DESC"
        );
        let mut stmt = self.tx.prepare(&query)?;
        let rows = stmt.query_map(params![user_id], conversation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn touch_conversation(
        &mut self,
        id: ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // MAX keeps updated_at monotonic even if a slow writer commits late.
        self.tx.execute(
            "UPDATE conversations SET updated_at = MAX(updated_at, ?2) \
             WHERE conversation_id = ?1",
            params![id, at.timestamp_millis()],
        )?;
        Ok(())
    }
}

impl<'conn> MessageStore for SqliteTransaction<'conn> {
    fn insert_message(&mut self, message: &Message) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO messages (message_id, conversation_id, sender_id, receiver_id, \
             content, reply_to, seq, is_read, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.receiver_id,
                message.content,
                message.reply_to,
                message.seq,
                message.is_read,
                message.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn next_seq(&mut self, conversation_id: ConversationId) -> Result<i64, StoreError> {
        let seq: i64 = self.tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    fn message_by_id(&mut self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1");
        Ok(self
            .tx
            .query_row(&query, params![id], message_from_row)
            .optional()?)
    }

    fn messages_for_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ?1 \
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.tx.prepare(&query)?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn last_message(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>, StoreError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ?1 \
             ORDER BY created_at DESC, seq DESC \
             LIMIT 1"
        );
        Ok(self
            .tx
            .query_row(&query, params![conversation_id], message_from_row)
            .optional()?)
    }
}

impl<'conn> ReadStateStore for SqliteTransaction<'conn> {
    fn mark_read(
        &mut self,
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    ) -> Result<usize, StoreError> {
        // is_read only ever transitions 0 -> 1; running this again after
        // everything is read matches zero rows and succeeds.
        let changed = self.tx.execute(
            "UPDATE messages SET is_read = 1 \
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![conversation_id, viewer_id],
        )?;
        Ok(changed)
    }

    fn unread_counts(
        &mut self,
        viewer_id: ParticipantId,
    ) -> Result<Vec<(ConversationId, i64)>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT c.conversation_id, COUNT(m.message_id) \
             FROM conversations c \
             LEFT JOIN messages m \
                    ON m.conversation_id = c.conversation_id \
                   AND m.is_read = 0 \
                   AND m.sender_id <> ?1 \
             WHERE c.participant_low = ?1 OR c.participant_high = ?1 \
             GROUP BY c.conversation_id",
        )?;
        let rows = stmt.query_map(params![viewer_id], |row| {
            Ok((row.get::<_, ConversationId>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn unread_count(
        &mut self,
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    ) -> Result<i64, StoreError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![conversation_id, viewer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl<'conn> NotificationStore for SqliteTransaction<'conn> {
    fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO notifications (notification_id, user_id, title, body, entity_ref, \
             is_read, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                notification.id,
                notification.user_id,
                notification.title,
                notification.body,
                notification.entity_ref,
                notification.is_read,
                notification.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn notifications_for_user(
        &mut self,
        user_id: ParticipantId,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT notification_id, user_id, title, body, entity_ref, is_read, created_at \
             FROM notifications \
             WHERE user_id = ?1 \
             ORDER BY created_at DESC, notification_id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], notification_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_notification_read(&mut self, id: NotificationId) -> Result<(), StoreError> {
        let changed = self.tx.execute(
            "UPDATE notifications SET is_read = 1 WHERE notification_id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("notification"));
        }
        Ok(())
    }
}
