use std::collections::HashMap;

use crate::libs::core::models::{ConversationId, ParticipantId};
use crate::libs::storage::storage_traits::{ReadStateStore, StoreError};

/// Marks every message in the conversation not sent by the viewer as read.
/// Returns the number of messages that actually flipped; zero means the
/// call was a no-op, which is still success (idempotence).
pub fn mark_read<T>(
    tx: &mut T,
    conversation_id: ConversationId,
    viewer_id: ParticipantId,
) -> Result<usize, StoreError>
where
    T: ReadStateStore,
{
    tx.mark_read(conversation_id, viewer_id)
}

/// Per-conversation unread totals for the viewer, one entry per
/// conversation the viewer participates in (zeros included). Always derived
/// from the message table; nothing here is cached or separately stored.
pub fn unread_counts<T>(
    tx: &mut T,
    viewer_id: ParticipantId,
) -> Result<HashMap<ConversationId, i64>, StoreError>
where
    T: ReadStateStore,
{
    Ok(tx.unread_counts(viewer_id)?.into_iter().collect())
}

/// Sum across all of the viewer's conversations, for the global badge.
pub fn unread_total<T>(tx: &mut T, viewer_id: ParticipantId) -> Result<i64, StoreError>
where
    T: ReadStateStore,
{
    Ok(tx
        .unread_counts(viewer_id)?
        .into_iter()
        .map(|(_, count)| count)
        .sum())
}
