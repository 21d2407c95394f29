use std::sync::{Arc, Barrier};
use std::thread;

use crate::common::*;

mod common;

// Two sessions discover each other at the same moment. Exactly one
// conversation row may exist afterwards, and both racers end up talking
// in it.
#[test]
fn concurrent_first_contact_converges_on_one_conversation() {
    let app = open_messaging();
    let messaging = Arc::new(app.messaging);
    let (staff, client) = (staff(), client());

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for (me, other, greeting) in [(staff, client, "hello"), (client, staff, "hi there")] {
        let messaging = Arc::clone(&messaging);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let conversation = messaging
                .create_or_get_conversation(me, other, None)
                .unwrap();
            messaging
                .send_message(conversation.id, me.id, greeting, None)
                .unwrap();
            conversation.id
        }));
    }

    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids[0], ids[1]);

    let messages = messaging.list_messages(ids[0]).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages.iter().map(|m| m.seq).collect::<Vec<_>>(),
        vec![1, 2]
    );

    for user in [staff, client] {
        let summaries = messaging.list_conversations_for_user(user.id).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].conversation.id, ids[0]);
        assert_eq!(summaries[0].unread_count, 1);
    }
}

// Repeated lookups after the race keep returning the winner's record.
#[test]
fn lookup_after_creation_is_stable() {
    let app = open_messaging();
    let (staff, client) = (staff(), client());

    let created = app
        .messaging
        .create_or_get_conversation(staff, client, Some("Retainer"))
        .unwrap();
    for _ in 0..3 {
        let found = app
            .messaging
            .create_or_get_conversation(client, staff, Some("ignored on lookup"))
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.subject.as_deref(), Some("Retainer"));
    }
}
