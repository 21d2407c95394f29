use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed uuid-v7 ids. v7 ids are time-ordered, which keeps primary-key
/// pages append-friendly and gives a stable tie-break within a timestamp.
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                Uuid::parse_str(text)
                    .map($name)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

uuid_id!(ParticipantId);
uuid_id!(ConversationId);
uuid_id!(MessageId);
uuid_id!(NotificationId);

/// Role of a participant as supplied by the identity boundary. Rendering
/// and policy code matches exhaustively on this; there is no table-driven
/// role dispatch anywhere in the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Staff,
    Client,
}

impl ToSql for ParticipantRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            ParticipantRole::Staff => Ok(ToSqlOutput::from("staff")),
            ParticipantRole::Client => Ok(ToSqlOutput::from("client")),
        }
    }
}

impl FromSql for ParticipantRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "staff" => Ok(ParticipantRole::Staff),
            "client" => Ok(ParticipantRole::Client),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Identity and role come from the surrounding application's identity
/// boundary and are trusted as given; this crate never authenticates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn new(id: ParticipantId, role: ParticipantRole) -> Self {
        Self { id, role }
    }
}

/// The unique thread between one participant pair. Participants are held
/// in canonical order (lower uuid first) so the unordered pair maps onto
/// a single unique index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_low: Participant,
    pub participant_high: Participant,
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Builds a new conversation record for an unordered pair. The caller
    /// is responsible for rejecting `a.id == b.id` beforehand.
    pub fn new(a: Participant, b: Participant, subject: Option<String>) -> Self {
        let (low, high) = canonical_pair(a, b);
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            participant_low: low,
            participant_high: high,
            subject,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user_id: ParticipantId) -> bool {
        self.participant_low.id == user_id || self.participant_high.id == user_id
    }

    /// The counterpart of `user_id` in this conversation, if `user_id` is
    /// a participant at all.
    pub fn counterpart(&self, user_id: ParticipantId) -> Option<&Participant> {
        if self.participant_low.id == user_id {
            Some(&self.participant_high)
        } else if self.participant_high.id == user_id {
            Some(&self.participant_low)
        } else {
            None
        }
    }

    pub fn participants(&self) -> [&Participant; 2] {
        [&self.participant_low, &self.participant_high]
    }
}

/// Orders an unordered pair by participant id so both orderings of the
/// same two people land on the same conversation row.
pub fn canonical_pair(a: Participant, b: Participant) -> (Participant, Participant) {
    if a.id <= b.id {
        (a, b)
    } else {
        (b, a)
    }
}

/// A single message in a conversation. Immutable once appended except for
/// `is_read`, which only ever transitions false -> true.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: ParticipantId,
    pub receiver_id: Option<ParticipantId>,
    pub content: String,
    pub reply_to: Option<MessageId>,
    /// Per-conversation sequence assigned at append time; breaks ordering
    /// ties between messages sharing a `created_at`.
    pub seq: i64,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        receiver_id: Option<ParticipantId>,
        content: String,
        reply_to: Option<MessageId>,
        seq: i64,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            receiver_id,
            content,
            reply_to,
            seq,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// Best-effort side-channel record. Read state here is independent of
/// message read state and is never consulted by the messaging core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: ParticipantId,
    pub title: String,
    pub body: String,
    pub entity_ref: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: ParticipantId,
        title: String,
        body: String,
        entity_ref: Option<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            title,
            body,
            entity_ref,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// List-view aggregate for one conversation as seen by one viewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}
