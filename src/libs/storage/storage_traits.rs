use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::libs::core::models::{
    Conversation, ConversationId, Message, MessageId, Notification, NotificationId, ParticipantId,
};

/// Storage backend seam. The associated transaction type carries all store
/// operations, so callers never touch connections directly.
pub trait Storage {
    type Transaction<'s>: Transactional + MessagingStore + 's
    where
        Self: 's;
}

pub trait Transactional {
    fn commit(self) -> Result<(), StoreError>;
    fn rollback(self) -> Result<(), StoreError>;
}

pub trait ConversationStore {
    /// Inserts a new conversation row. Fails with [`StoreError::Conflict`]
    /// when a conversation for the same participant pair already exists.
    fn insert_conversation(&mut self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Looks the pair up in canonical order (lower participant id first).
    fn conversation_by_pair(
        &mut self,
        low: ParticipantId,
        high: ParticipantId,
    ) -> Result<Option<Conversation>, StoreError>;

    fn conversation_by_id(
        &mut self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// All conversations `user_id` participates in, most recently updated
    /// first.
    fn conversations_for_user(
        &mut self,
        user_id: ParticipantId,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Moves `updated_at` forward to `at`. Drives most-recent-first list
    /// ordering; called from the same transaction that appends a message.
    fn touch_conversation(
        &mut self,
        id: ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

pub trait MessageStore {
    fn insert_message(&mut self, message: &Message) -> Result<(), StoreError>;

    /// Next per-conversation sequence number. Only meaningful inside the
    /// write transaction that will insert the message.
    fn next_seq(&mut self, conversation_id: ConversationId) -> Result<i64, StoreError>;

    fn message_by_id(&mut self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// Full thread, ascending `(created_at, seq)`.
    fn messages_for_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, StoreError>;

    fn last_message(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>, StoreError>;
}

pub trait ReadStateStore {
    /// Flips `is_read` on every unread message in the conversation that was
    /// not sent by `viewer_id`. Returns how many rows changed; zero is a
    /// successful no-op, which is what makes the operation idempotent.
    fn mark_read(
        &mut self,
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    ) -> Result<usize, StoreError>;

    /// Unread totals for every conversation the viewer participates in,
    /// including zero entries. Derived from the message table on each call.
    fn unread_counts(
        &mut self,
        viewer_id: ParticipantId,
    ) -> Result<Vec<(ConversationId, i64)>, StoreError>;

    fn unread_count(
        &mut self,
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    ) -> Result<i64, StoreError>;
}

pub trait NotificationStore {
    fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError>;

    /// Newest first.
    fn notifications_for_user(
        &mut self,
        user_id: ParticipantId,
    ) -> Result<Vec<Notification>, StoreError>;

    fn mark_notification_read(&mut self, id: NotificationId) -> Result<(), StoreError>;
}

pub trait MessagingStore:
    ConversationStore + MessageStore + ReadStateStore + NotificationStore
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    /// Unique-constraint violation. Raised by `insert_conversation` when a
    /// concurrent caller created the pair first; resolved inside
    /// find-or-create and never surfaced to the public API.
    #[error("unique constraint conflict: {0}")]
    Conflict(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> StoreError {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict("unique constraint")
            }
            _ => StoreError::Sqlite(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> StoreError {
        StoreError::Pool(err.to_string())
    }
}
