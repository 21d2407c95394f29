use tracing::debug;

use crate::libs::core::models::{
    canonical_pair, Conversation, ConversationSummary, Participant, ParticipantId,
};
use crate::libs::storage::storage_traits::{
    ConversationStore, MessageStore, ReadStateStore, StoreError,
};

/// Outcome of [`find_or_create`], so the caller knows whether to announce a
/// new conversation on the list topic.
pub struct DirectoryHit {
    pub conversation: Conversation,
    pub created: bool,
}

/// Returns the unique conversation for the unordered pair, creating it on
/// first contact.
///
/// Lookup and insert run inside the caller's write transaction, so under a
/// single writer the race never materializes. The `Conflict` arm covers a
/// concurrent creator on another connection (or another process on the same
/// database file): the losing insert refetches and returns the winner, and
/// the conflict stays invisible to callers.
pub fn find_or_create<T>(
    tx: &mut T,
    a: Participant,
    b: Participant,
    subject: Option<&str>,
) -> Result<DirectoryHit, StoreError>
where
    T: ConversationStore,
{
    let (low, high) = canonical_pair(a, b);
    if let Some(existing) = tx.conversation_by_pair(low.id, high.id)? {
        return Ok(DirectoryHit {
            conversation: existing,
            created: false,
        });
    }

    let fresh = Conversation::new(low, high, subject.map(str::to_owned));
    match tx.insert_conversation(&fresh) {
        Ok(()) => Ok(DirectoryHit {
            conversation: fresh,
            created: true,
        }),
        Err(StoreError::Conflict(_)) => {
            debug!(
                participant_low = %low.id,
                participant_high = %high.id,
                "conversation insert lost the race, refetching winner"
            );
            let winner = tx
                .conversation_by_pair(low.id, high.id)?
                .ok_or(StoreError::NotFound("conversation"))?;
            Ok(DirectoryHit {
                conversation: winner,
                created: false,
            })
        }
        Err(other) => Err(other),
    }
}

/// List-view aggregation: every conversation the user participates in,
/// most recently updated first, each with its last message and the user's
/// unread count. Computed from durable state on every call; holds nothing.
pub fn list_for_user<T>(
    tx: &mut T,
    user_id: ParticipantId,
) -> Result<Vec<ConversationSummary>, StoreError>
where
    T: ConversationStore + MessageStore + ReadStateStore,
{
    let conversations = tx.conversations_for_user(user_id)?;
    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let last_message = tx.last_message(conversation.id)?;
        let unread_count = tx.unread_count(conversation.id, user_id)?;
        summaries.push(ConversationSummary {
            conversation,
            last_message,
            unread_count,
        });
    }
    Ok(summaries)
}
