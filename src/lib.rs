//! Threaded messaging subsystem for the practice back office.
//!
//! Pairwise staff/client conversations with an append-only ordered message
//! log, derived read state, reply chains, per-conversation realtime fan-out
//! and a best-effort notification side channel. The embedding application
//! supplies identity (participant ids and roles) and owns every other
//! surface; this crate owns the messaging core and its SQLite store.

pub mod libs;

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::libs::core::models::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, Notification,
    NotificationId, Participant, ParticipantId,
};
use crate::libs::core::{directory, read_state, reply};
use crate::libs::fanout::{ConversationEvent, FanoutRegistry, UserEvent};
use crate::libs::notify::NotificationDispatcher;
use crate::libs::storage::database::storage_sqlite::{SqliteStore, SqliteTransaction};
use crate::libs::storage::storage_traits::{
    ConversationStore, MessageStore, NotificationStore, StoreError, Transactional,
};

pub use crate::libs::core::models::{ParticipantRole, canonical_pair};
pub use crate::libs::fanout::{ConversationEvents, Delivery, UserEvents};

/// Public error taxonomy. Uniqueness conflicts during find-or-create are
/// resolved internally and never appear here.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid reply reference: {0}")]
    InvalidReference(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("caller is not a participant of the target conversation")]
    Permission,

    /// Storage or transport trouble the caller may retry. This crate never
    /// retries on its own; a resubmitted send is a new, explicit send.
    #[error("storage unavailable: {0}")]
    Transient(String),
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => MessagingError::NotFound(what),
            StoreError::Sqlite(msg) | StoreError::Pool(msg) => MessagingError::Transient(msg),
            StoreError::Conflict(what) => {
                MessagingError::Transient(format!("unresolved conflict on {what}"))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct MessagingConfig {
    pub database_path: String,
    /// Ring size of each fan-out topic; a subscriber further behind than
    /// this gets a lag signal and must resync.
    pub fanout_capacity: usize,
    /// Pending-notification bound; dispatches beyond it are dropped.
    pub notification_queue_depth: usize,
}

impl MessagingConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            fanout_capacity: 256,
            notification_queue_depth: 512,
        }
    }
}

/// The messaging facade. One instance per process; cheap to share behind an
/// `Arc`, and every operation takes `&self`.
pub struct Messaging {
    store: SqliteStore,
    fanout: FanoutRegistry,
    dispatcher: NotificationDispatcher,
    /// Held across commit+publish so fan-out delivery order matches commit
    /// order. Writers already serialize on SQLite's write lock; this only
    /// closes the gap between releasing it and publishing.
    publish_order: Mutex<()>,
}

impl Messaging {
    pub fn open(config: MessagingConfig) -> Result<Self, MessagingError> {
        let store = SqliteStore::open(&config.database_path)?;
        let dispatcher =
            NotificationDispatcher::spawn(store.clone(), config.notification_queue_depth);
        Ok(Self {
            store,
            fanout: FanoutRegistry::new(config.fanout_capacity),
            dispatcher,
            publish_order: Mutex::new(()),
        })
    }

    /// Returns the unique conversation for the unordered pair `(a, b)`,
    /// creating it on first contact. Safe to race from any number of
    /// callers: losers of the creation race transparently receive the
    /// winner's record.
    pub fn create_or_get_conversation(
        &self,
        a: Participant,
        b: Participant,
        subject: Option<&str>,
    ) -> Result<Conversation, MessagingError> {
        if a.id == b.id {
            return Err(MessagingError::Validation(
                "a conversation requires two distinct participants".into(),
            ));
        }

        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::write(&mut conn)?;
        let hit = directory::find_or_create(&mut tx, a, b, subject)?;

        let order = self
            .publish_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.commit()?;
        if hit.created {
            debug!(conversation_id = %hit.conversation.id, "conversation created");
            for participant in hit.conversation.participants() {
                self.fanout.publish_user(
                    participant.id,
                    UserEvent::ConversationListChanged {
                        conversation_id: hit.conversation.id,
                    },
                );
            }
        }
        drop(order);
        Ok(hit.conversation)
    }

    /// Appends a message. Synchronous up to the durable commit; fan-out and
    /// the notification side effect happen after the caller already has its
    /// result. On failure nothing is persisted and the caller's draft is
    /// theirs to resubmit explicitly.
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, MessagingError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MessagingError::Validation(
                "message content must not be empty".into(),
            ));
        }

        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::write(&mut conn)?;

        let conversation = tx
            .conversation_by_id(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        let receiver = *conversation
            .counterpart(sender_id)
            .ok_or(MessagingError::Permission)?;

        if let Some(parent_id) = reply_to {
            let parent = tx.message_by_id(parent_id)?.ok_or_else(|| {
                MessagingError::InvalidReference("replied-to message does not exist".into())
            })?;
            if parent.conversation_id != conversation_id {
                return Err(MessagingError::InvalidReference(
                    "replied-to message belongs to a different conversation".into(),
                ));
            }
        }

        let seq = tx.next_seq(conversation_id)?;
        let message = Message::new(
            conversation_id,
            sender_id,
            Some(receiver.id),
            content.to_owned(),
            reply_to,
            seq,
        );
        tx.insert_message(&message)?;
        tx.touch_conversation(conversation_id, message.created_at)?;

        let order = self
            .publish_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.commit()?;
        self.fanout.publish(
            conversation_id,
            ConversationEvent::MessageAppended(message.clone()),
        );
        for participant in conversation.participants() {
            self.fanout.publish_user(
                participant.id,
                UserEvent::ConversationListChanged { conversation_id },
            );
        }
        drop(order);

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            seq,
            "message appended"
        );

        // Fire-and-forget; a dispatcher failure never unwinds the send.
        self.dispatcher.dispatch(Notification::new(
            receiver.id,
            "New message".into(),
            preview(content),
            Some(conversation_id.to_string()),
        ));

        Ok(message)
    }

    /// Full thread, ascending by `(created_at, seq)`. Recomputed from
    /// durable state on every call, so it is also the resync path for
    /// subscribers that disconnected or lagged.
    pub fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::read(&mut conn)?;
        tx.conversation_by_id(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        Ok(tx.messages_for_conversation(conversation_id)?)
    }

    /// Marks everything the viewer has not sent as read. Idempotent: once
    /// the conversation is fully read, further calls succeed as no-ops and
    /// publish nothing.
    pub fn mark_read(
        &self,
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    ) -> Result<(), MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::write(&mut conn)?;

        let conversation = tx
            .conversation_by_id(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        if !conversation.is_participant(viewer_id) {
            return Err(MessagingError::Permission);
        }

        let changed = read_state::mark_read(&mut tx, conversation_id, viewer_id)?;
        let order = self
            .publish_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.commit()?;
        if changed > 0 {
            self.fanout.publish(
                conversation_id,
                ConversationEvent::ReadStateChanged {
                    conversation_id,
                    viewer_id,
                },
            );
            self.fanout.publish_user(
                viewer_id,
                UserEvent::ConversationListChanged { conversation_id },
            );
        }
        drop(order);

        debug!(%conversation_id, %viewer_id, changed, "marked read");
        Ok(())
    }

    /// Unread totals per conversation for the viewer, zeros included.
    pub fn unread_counts(
        &self,
        viewer_id: ParticipantId,
    ) -> Result<HashMap<ConversationId, i64>, MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::read(&mut conn)?;
        Ok(read_state::unread_counts(&mut tx, viewer_id)?)
    }

    pub fn unread_total(&self, viewer_id: ParticipantId) -> Result<i64, MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::read(&mut conn)?;
        Ok(read_state::unread_total(&mut tx, viewer_id)?)
    }

    /// List view: the viewer's conversations, most recently updated first,
    /// with last message and unread count.
    pub fn list_conversations_for_user(
        &self,
        user_id: ParticipantId,
    ) -> Result<Vec<ConversationSummary>, MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::read(&mut conn)?;
        Ok(directory::list_for_user(&mut tx, user_id)?)
    }

    /// Quoted-parent lookup for presentation. Best effort: any miss or
    /// storage trouble renders as "no quoted context", never an error.
    pub fn resolve_reply(&self, message: &Message) -> Option<Message> {
        let mut conn = match self.store.new_connection() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "reply resolution skipped, no connection");
                return None;
            }
        };
        let mut tx = match SqliteTransaction::read(&mut conn) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "reply resolution skipped, no transaction");
                return None;
            }
        };
        reply::resolve(&mut tx, message)
    }

    /// Attaches a live subscriber to one conversation. Each open session
    /// holds its own subscription; a host that keeps a conversation active
    /// on screen typically reacts to `MessageAppended` by calling
    /// [`Messaging::mark_read`] for the viewing participant.
    pub fn subscribe(&self, conversation_id: ConversationId) -> ConversationEvents {
        self.fanout.subscribe(conversation_id)
    }

    /// Attaches to the user's coarse conversation-list topic, which fires
    /// whenever any of their conversation summaries change.
    pub fn subscribe_user(&self, user_id: ParticipantId) -> UserEvents {
        self.fanout.subscribe_user(user_id)
    }

    /// Notification side channel, read by the host application's shell.
    /// Never consulted by the messaging core.
    pub fn notifications_for_user(
        &self,
        user_id: ParticipantId,
    ) -> Result<Vec<Notification>, MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::read(&mut conn)?;
        Ok(tx.notifications_for_user(user_id)?)
    }

    pub fn mark_notification_read(&self, id: NotificationId) -> Result<(), MessagingError> {
        let mut conn = self.store.new_connection()?;
        let mut tx = SqliteTransaction::write(&mut conn)?;
        tx.mark_notification_read(id)?;
        Ok(tx.commit()?)
    }
}

/// First line of the message, clipped to a notification-sized preview.
fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    let mut out: String = first_line.chars().take(120).collect();
    if out.len() < first_line.len() {
        out.push('…');
    }
    out
}
