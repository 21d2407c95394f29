use std::thread;
use std::time::{Duration, Instant};

use practice_messaging::libs::core::models::Notification;
use practice_messaging::libs::core::models::ParticipantId;

use crate::common::*;

mod common;

/// The dispatcher persists on a worker thread, so tests poll with a
/// deadline instead of assuming the row is visible immediately.
fn wait_for_notifications(
    app: &TestApp,
    user_id: ParticipantId,
    expected: usize,
) -> Vec<Notification> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let notifications = app.messaging.notifications_for_user(user_id).unwrap();
        if notifications.len() >= expected {
            return notifications;
        }
        assert!(
            Instant::now() < deadline,
            "expected {expected} notifications, found {}",
            notifications.len()
        );
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn send_notifies_the_receiver_only() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();
    app.messaging
        .send_message(conversation.id, staff.id, "hello", None)
        .unwrap();

    let notifications = wait_for_notifications(&app, client.id, 1);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "New message");
    assert_eq!(notifications[0].body, "hello");
    assert_eq!(
        notifications[0].entity_ref.as_deref(),
        Some(conversation.id.to_string().as_str())
    );
    assert!(!notifications[0].is_read);

    // The sender gets nothing.
    assert!(app.messaging.notifications_for_user(staff.id).unwrap().is_empty());
}

#[test]
fn pending_dispatches_flush_on_shutdown() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();
    for i in 1..=4 {
        app.messaging
            .send_message(conversation.id, staff.id, &format!("update {i}"), None)
            .unwrap();
    }

    // Dropping the instance drains the queue before the worker exits.
    let app = app.reopen();
    let notifications = app.messaging.notifications_for_user(client.id).unwrap();
    assert_eq!(notifications.len(), 4);
}

#[test]
fn notification_read_state_is_independent_of_messages() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();
    app.messaging
        .send_message(conversation.id, staff.id, "hello", None)
        .unwrap();

    let notifications = wait_for_notifications(&app, client.id, 1);
    app.messaging
        .mark_notification_read(notifications[0].id)
        .unwrap();

    let notifications = app.messaging.notifications_for_user(client.id).unwrap();
    assert!(notifications[0].is_read);
    // Dismissing the banner does not read the message itself.
    assert_eq!(app.messaging.unread_total(client.id).unwrap(), 1);

    // And reading the thread leaves other notification rows alone.
    app.messaging.mark_read(conversation.id, client.id).unwrap();
    let notifications = app.messaging.notifications_for_user(client.id).unwrap();
    assert!(notifications[0].is_read);
    assert_eq!(app.messaging.unread_total(client.id).unwrap(), 0);
}

// Queue pressure means dropped notifications, never failed sends.
#[test]
fn sends_survive_a_saturated_queue() {
    let app = open_with(|config| config.notification_queue_depth = 1);
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();

    for i in 1..=50 {
        app.messaging
            .send_message(conversation.id, staff.id, &format!("update {i}"), None)
            .unwrap();
    }
    assert_eq!(app.messaging.list_messages(conversation.id).unwrap().len(), 50);

    // Whatever made it through the queue is persisted; drops are silent.
    let app = app.reopen();
    let delivered = app.messaging.notifications_for_user(client.id).unwrap();
    assert!(!delivered.is_empty());
    assert!(delivered.len() <= 50);
}

#[test]
fn long_messages_are_clipped_to_a_preview() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());
    let conversation = app
        .messaging
        .create_or_get_conversation(staff, client, None)
        .unwrap();

    let long_line = "a".repeat(200);
    let content = format!("{long_line}\nsecond line is dropped");
    app.messaging
        .send_message(conversation.id, staff.id, &content, None)
        .unwrap();

    let notifications = wait_for_notifications(&app, client.id, 1);
    assert_eq!(notifications[0].body.chars().count(), 121);
    assert!(notifications[0].body.ends_with('…'));
    assert!(notifications[0].body.starts_with("aaaa"));
    assert!(!notifications[0].body.contains("second line"));

    // The stored message keeps the full content.
    let messages = app.messaging.list_messages(conversation.id).unwrap();
    assert_eq!(messages[0].content, content);
}
