//! Per-conversation realtime fan-out.
//!
//! One broadcast topic per conversation plus one coarser topic per user
//! (the conversation-list feed). Topics are bounded rings: a publisher
//! never blocks on a slow subscriber, and a subscriber that falls behind
//! gets an explicit [`Delivery::Lagged`] telling it to resync from durable
//! state (`list_messages` / `unread_counts`) instead of trusting deltas.
//! Deliveries are at-least-once hints, so a duplicate or re-delivered
//! event is harmless by contract.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::trace;

use crate::libs::core::models::{ConversationId, Message, ParticipantId};

/// Delta on one conversation's topic.
#[derive(Clone, Debug)]
pub enum ConversationEvent {
    MessageAppended(Message),
    ReadStateChanged {
        conversation_id: ConversationId,
        viewer_id: ParticipantId,
    },
}

/// Delta on a user's conversation-list topic: some conversation the user
/// participates in was created or had its summary (last message, unread
/// count) change. Carries only the id; the subscriber re-reads the summary.
#[derive(Clone, Debug)]
pub enum UserEvent {
    ConversationListChanged { conversation_id: ConversationId },
}

#[derive(Debug)]
pub enum Delivery<E> {
    Event(E),
    /// The subscriber fell behind the bounded ring and `skipped` events
    /// were dropped. The only correct reaction is a full resync.
    Lagged { skipped: u64 },
}

pub struct FanoutRegistry {
    capacity: usize,
    conversations: RwLock<HashMap<ConversationId, broadcast::Sender<ConversationEvent>>>,
    users: RwLock<HashMap<ParticipantId, broadcast::Sender<UserEvent>>>,
}

impl FanoutRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            conversations: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Attaches a new subscriber to the conversation's topic. Any number of
    /// sessions may subscribe concurrently; each gets its own cursor into
    /// the ring and only sees events published after this call.
    pub fn subscribe(&self, conversation_id: ConversationId) -> ConversationEvents {
        let mut topics = self
            .conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = topics
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        ConversationEvents {
            rx: sender.subscribe(),
        }
    }

    pub fn subscribe_user(&self, user_id: ParticipantId) -> UserEvents {
        let mut topics = self
            .users
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = topics
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        UserEvents {
            rx: sender.subscribe(),
        }
    }

    /// Publishes to the conversation topic. A topic nobody subscribed to is
    /// simply skipped; a topic whose subscribers have all gone away is
    /// pruned lazily.
    pub fn publish(&self, conversation_id: ConversationId, event: ConversationEvent) {
        let delivered = {
            let topics = self
                .conversations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match topics.get(&conversation_id) {
                Some(sender) => sender.send(event).is_ok(),
                None => return,
            }
        };
        if !delivered {
            trace!(%conversation_id, "conversation topic has no subscribers, pruning");
            let mut topics = self
                .conversations
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(sender) = topics.get(&conversation_id) {
                if sender.receiver_count() == 0 {
                    topics.remove(&conversation_id);
                }
            }
        }
    }

    pub fn publish_user(&self, user_id: ParticipantId, event: UserEvent) {
        let delivered = {
            let topics = self
                .users
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match topics.get(&user_id) {
                Some(sender) => sender.send(event).is_ok(),
                None => return,
            }
        };
        if !delivered {
            let mut topics = self
                .users
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(sender) = topics.get(&user_id) {
                if sender.receiver_count() == 0 {
                    topics.remove(&user_id);
                }
            }
        }
    }
}

/// A session's live view of one conversation topic. Long-lived; recovery
/// after disconnection or lag is a full resync, never gap-filling.
pub struct ConversationEvents {
    rx: broadcast::Receiver<ConversationEvent>,
}

impl ConversationEvents {
    /// Waits for the next delivery. `None` means the registry shut down.
    pub async fn next(&mut self) -> Option<Delivery<ConversationEvent>> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(Delivery::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking poll; `None` when nothing is pending right now.
    pub fn try_next(&mut self) -> Option<Delivery<ConversationEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(Delivery::Lagged { skipped })
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => None,
        }
    }
}

/// A user's live view of their conversation-list topic.
pub struct UserEvents {
    rx: broadcast::Receiver<UserEvent>,
}

impl UserEvents {
    pub async fn next(&mut self) -> Option<Delivery<UserEvent>> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(Delivery::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn try_next(&mut self) -> Option<Delivery<UserEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(Delivery::Lagged { skipped })
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => None,
        }
    }
}
