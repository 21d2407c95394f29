use std::time::Duration;

use practice_messaging::libs::fanout::{ConversationEvent, UserEvent};
use practice_messaging::Delivery;
use tokio::time::timeout;

use crate::common::*;

mod common;

async fn next_conversation_event(
    events: &mut practice_messaging::ConversationEvents,
) -> Delivery<ConversationEvent> {
    timeout(Duration::from_secs(1), events.next())
        .await
        .expect("event within deadline")
        .expect("topic still open")
}

async fn next_user_event(
    events: &mut practice_messaging::UserEvents,
) -> Delivery<UserEvent> {
    timeout(Duration::from_secs(1), events.next())
        .await
        .expect("event within deadline")
        .expect("topic still open")
}

#[tokio::test]
async fn appended_messages_arrive_in_commit_order() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();

    let mut events = app.messaging.subscribe(conversation.id);
    for i in 1..=3 {
        app.messaging
            .send_message(conversation.id, staff.id, &format!("message {i}"), None)
            .unwrap();
    }

    for expected_seq in 1..=3 {
        match next_conversation_event(&mut events).await {
            Delivery::Event(ConversationEvent::MessageAppended(message)) => {
                assert_eq!(message.seq, expected_seq);
                assert_eq!(message.content, format!("message {expected_seq}"));
            }
            other => panic!("expected appended message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn mark_read_publishes_once_per_state_change() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();
    app.messaging
        .send_message(conversation.id, staff.id, "hello", None)
        .unwrap();

    let mut events = app.messaging.subscribe(conversation.id);
    app.messaging.mark_read(conversation.id, client.id).unwrap();
    match next_conversation_event(&mut events).await {
        Delivery::Event(ConversationEvent::ReadStateChanged {
            conversation_id,
            viewer_id,
        }) => {
            assert_eq!(conversation_id, conversation.id);
            assert_eq!(viewer_id, client.id);
        }
        other => panic!("expected read-state change, got {other:?}"),
    }

    // The no-op repeat publishes nothing.
    app.messaging.mark_read(conversation.id, client.id).unwrap();
    assert!(events.try_next().is_none());
}

#[tokio::test]
async fn user_topic_fires_on_list_changes() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());

    let mut events = app.messaging.subscribe_user(client.id);
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();
    match next_user_event(&mut events).await {
        Delivery::Event(UserEvent::ConversationListChanged { conversation_id }) => {
            assert_eq!(conversation_id, conversation.id);
        }
        other => panic!("expected list change, got {other:?}"),
    }

    app.messaging
        .send_message(conversation.id, staff.id, "hello", None)
        .unwrap();
    match next_user_event(&mut events).await {
        Delivery::Event(UserEvent::ConversationListChanged { conversation_id }) => {
            assert_eq!(conversation_id, conversation.id);
        }
        other => panic!("expected list change, got {other:?}"),
    }
}

#[tokio::test]
async fn topics_are_isolated_per_conversation() {
    let app = open_messaging();
    let (staff, client_a, client_b) = (staff(), client(), client());
    let conv_a = app
        .messaging
        .create_or_get_conversation(staff, client_a, None)
        .unwrap();
    let conv_b = app
        .messaging
        .create_or_get_conversation(staff, client_b, None)
        .unwrap();

    let mut events_a = app.messaging.subscribe(conv_a.id);
    app.messaging
        .send_message(conv_b.id, staff.id, "other thread", None)
        .unwrap();
    assert!(events_a.try_next().is_none());
}

// A subscriber that falls behind the bounded ring gets a lag signal and
// recovers the full thread from the store.
#[tokio::test]
async fn lagged_subscriber_is_told_to_resync() {
    let app = open_with(|config| config.fanout_capacity = 2);
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();

    let mut events = app.messaging.subscribe(conversation.id);
    for i in 1..=5 {
        app.messaging
            .send_message(conversation.id, staff.id, &format!("message {i}"), None)
            .unwrap();
    }

    match next_conversation_event(&mut events).await {
        Delivery::Lagged { skipped } => assert_eq!(skipped, 3),
        other => panic!("expected lag signal, got {other:?}"),
    }
    match next_conversation_event(&mut events).await {
        Delivery::Event(ConversationEvent::MessageAppended(message)) => {
            assert_eq!(message.seq, 4)
        }
        other => panic!("expected appended message, got {other:?}"),
    }

    // Resync path: the durable log has everything the ring dropped.
    let messages = app.messaging.list_messages(conversation.id).unwrap();
    assert_eq!(
        messages.iter().map(|m| m.seq).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}
