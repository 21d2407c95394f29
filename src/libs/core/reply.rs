use tracing::warn;

use crate::libs::core::models::Message;
use crate::libs::storage::storage_traits::MessageStore;

/// Resolves the quoted parent of `message`, best-effort.
///
/// Used only for presentation: a missing parent, a parent that somehow
/// points into another conversation, or a storage hiccup all yield `None`
/// so the read path renders the message without quoted context instead of
/// failing. Never mutates anything.
pub fn resolve<T>(tx: &mut T, message: &Message) -> Option<Message>
where
    T: MessageStore,
{
    let parent_id = message.reply_to?;
    match tx.message_by_id(parent_id) {
        Ok(Some(parent)) if parent.conversation_id == message.conversation_id => Some(parent),
        Ok(Some(parent)) => {
            // Append-time validation forbids this; tolerate stale data.
            warn!(
                message_id = %message.id,
                parent_id = %parent.id,
                "reply parent belongs to a different conversation, dropping quote"
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "reply lookup failed");
            None
        }
    }
}
