use std::sync::{Arc, Mutex};

use a2a_api::TaskState;
use chat_store::{
    ChatStore, ChatStoreError, DeliveryStatus, Role, StoreEvent, StoredMessage, StoredPart,
    TaskRecord, UNTITLED_CONVERSATION,
};

fn store() -> (tempfile::TempDir, ChatStore) {
    let dir = tempfile::tempdir().expect("temp store root");
    let store = ChatStore::open(dir.path()).expect("store opens");
    (dir, store)
}

fn user_message(id: &str, text: &str, ts: &str) -> StoredMessage {
    StoredMessage {
        id: id.to_owned(),
        role: Role::User,
        parts: vec![StoredPart::text(text)],
        ts: ts.to_owned(),
        delivery: DeliveryStatus::Sending,
        task_id: None,
        feedback_eligible: false,
    }
}

fn agent_message(id: &str, text: &str, ts: &str) -> StoredMessage {
    StoredMessage {
        id: id.to_owned(),
        role: Role::Agent,
        parts: vec![StoredPart::text(text)],
        ts: ts.to_owned(),
        delivery: DeliveryStatus::Sent,
        task_id: None,
        feedback_eligible: false,
    }
}

#[test]
fn append_is_idempotent_on_message_id() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");

    let inserted = store
        .append_message(&conversation.id, user_message("m-1", "hi", "2024-05-01T10:00:00Z"))
        .expect("append");
    assert!(inserted);

    let inserted = store
        .append_message(&conversation.id, user_message("m-1", "hi again", "2024-05-01T10:00:09Z"))
        .expect("append");
    assert!(!inserted, "re-ingesting a known id must be a no-op");

    let loaded = store.conversation(&conversation.id).expect("loaded");
    assert_eq!(loaded.messages.len(), 1);
    assert_eq!(loaded.message_count, 1);
    assert_eq!(loaded.messages[0].joined_text(), "hi");
}

#[test]
fn merging_the_same_history_twice_is_idempotent() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");
    store
        .append_message(&conversation.id, user_message("m-1", "hi", "2024-05-01T10:00:00Z"))
        .expect("append");

    let history = vec![
        agent_message("m-2", "hello!", "2024-05-01T10:00:02Z"),
        agent_message("m-3", "how can I help?", "2024-05-01T10:00:03Z"),
    ];

    let first = store
        .merge_history(&conversation.id, history.clone())
        .expect("first merge");
    assert_eq!(first, 2);
    let after_first = store.conversation(&conversation.id).expect("loaded");

    let second = store
        .merge_history(&conversation.id, history)
        .expect("second merge");
    assert_eq!(second, 0);
    let after_second = store.conversation(&conversation.id).expect("loaded");

    assert_eq!(after_first.messages, after_second.messages);
    let ids: Vec<&str> = after_second.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-1", "m-2", "m-3"]);
}

#[test]
fn merge_does_not_clobber_local_optimistic_messages() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");
    store
        .append_message(
            &conversation.id,
            user_message("m-local", "optimistic", "2024-05-01T10:00:05Z"),
        )
        .expect("append");

    // Server reports an older message plus a stale copy of the local one.
    store
        .merge_history(
            &conversation.id,
            vec![
                agent_message("m-old", "earlier reply", "2024-05-01T10:00:01Z"),
                agent_message("m-local", "server copy", "2024-05-01T10:00:05Z"),
            ],
        )
        .expect("merge");

    let loaded = store.conversation(&conversation.id).expect("loaded");
    let ids: Vec<&str> = loaded.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-old", "m-local"]);
    assert_eq!(loaded.messages[1].joined_text(), "optimistic");
}

#[test]
fn merge_preserves_insertion_order_for_unparseable_timestamps() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");

    store
        .merge_history(
            &conversation.id,
            vec![
                agent_message("m-1", "a", "2024-05-01T10:00:01Z"),
                agent_message("weird-1", "b", "garbage"),
                agent_message("weird-2", "c", "also garbage"),
                agent_message("m-2", "d", "2024-05-01T10:00:04Z"),
            ],
        )
        .expect("merge");

    let loaded = store.conversation(&conversation.id).expect("loaded");
    let ids: Vec<&str> = loaded.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-1", "weird-1", "weird-2", "m-2"]);
}

#[test]
fn title_is_computed_once_on_first_sent_user_message() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");
    assert_eq!(conversation.title, UNTITLED_CONVERSATION);

    store
        .append_message(
            &conversation.id,
            user_message("m-1", "What is the weather in Berlin?", "2024-05-01T10:00:00Z"),
        )
        .expect("append");
    // Still untitled while the message is in flight.
    assert_eq!(
        store.conversation(&conversation.id).expect("loaded").title,
        UNTITLED_CONVERSATION
    );

    store
        .set_delivery(&conversation.id, "m-1", DeliveryStatus::Sent)
        .expect("delivery");
    assert_eq!(
        store.conversation(&conversation.id).expect("loaded").title,
        "What is the weather in Berlin?"
    );

    // A later sent message must not retitle the conversation.
    store
        .append_message(
            &conversation.id,
            user_message("m-2", "and in Paris?", "2024-05-01T10:01:00Z"),
        )
        .expect("append");
    store
        .set_delivery(&conversation.id, "m-2", DeliveryStatus::Sent)
        .expect("delivery");
    assert_eq!(
        store.conversation(&conversation.id).expect("loaded").title,
        "What is the weather in Berlin?"
    );
}

#[test]
fn terminal_task_records_are_read_only() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");

    store
        .set_current_task(
            &conversation.id,
            TaskRecord {
                task_id: "t-1".to_owned(),
                context_id: "c-1".to_owned(),
                state: TaskState::Working,
                state_timestamp: None,
            },
        )
        .expect("working record");
    store
        .set_current_task(
            &conversation.id,
            TaskRecord {
                task_id: "t-1".to_owned(),
                context_id: "c-1".to_owned(),
                state: TaskState::Completed,
                state_timestamp: None,
            },
        )
        .expect("terminal record");
    assert!(store.is_terminal_task("t-1"));

    let error = store
        .set_current_task(
            &conversation.id,
            TaskRecord {
                task_id: "t-1".to_owned(),
                context_id: "c-1".to_owned(),
                state: TaskState::Working,
                state_timestamp: None,
            },
        )
        .expect_err("terminal task must not be re-recorded");
    assert!(matches!(
        error,
        ChatStoreError::TerminalTaskOverwrite { .. }
    ));
}

#[test]
fn processing_flag_is_exclusive_per_conversation() {
    let (_dir, store) = store();
    let a = store.create_conversation().expect("a");
    let b = store.create_conversation().expect("b");

    assert!(store.try_begin_processing(&a.id));
    assert!(!store.try_begin_processing(&a.id), "second claim must fail");
    assert!(store.try_begin_processing(&b.id), "other conversations are unaffected");

    store.end_processing(&a.id);
    assert!(!store.is_processing(&a.id));
    assert!(store.try_begin_processing(&a.id));
}

#[test]
fn deleting_a_conversation_releases_task_and_processing_state() {
    let (_dir, store) = store();
    let conversation = store.create_conversation().expect("conversation");
    store
        .set_current_task(
            &conversation.id,
            TaskRecord {
                task_id: "t-1".to_owned(),
                context_id: "c-1".to_owned(),
                state: TaskState::Working,
                state_timestamp: None,
            },
        )
        .expect("record");
    assert!(store.try_begin_processing(&conversation.id));

    store
        .delete_conversation(&conversation.id)
        .expect("delete");
    assert!(store.conversation(&conversation.id).is_none());
    assert!(store.current_task(&conversation.id).is_none());
    assert!(!store.is_processing(&conversation.id));
}

#[test]
fn conversations_persist_across_reopen() {
    let dir = tempfile::tempdir().expect("temp store root");
    let conversation_id = {
        let store = ChatStore::open(dir.path()).expect("store opens");
        let conversation = store.create_conversation().expect("conversation");
        store
            .append_message(&conversation.id, user_message("m-1", "hi", "2024-05-01T10:00:00Z"))
            .expect("append");
        store
            .set_delivery(&conversation.id, "m-1", DeliveryStatus::Sent)
            .expect("delivery");
        store
            .set_active_conversation(Some(conversation.id.clone()))
            .expect("active");
        store.set_theme("light").expect("theme");
        conversation.id
    };

    let reopened = ChatStore::open(dir.path()).expect("store reopens");
    let conversation = reopened
        .conversation(&conversation_id)
        .expect("conversation survives restart");
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.title, "hi");
    assert_eq!(reopened.active_conversation(), Some(conversation_id));
    assert_eq!(reopened.theme(), "light");
}

#[test]
fn subscribers_observe_mutations_synchronously() {
    let (_dir, store) = store();
    let events: Arc<Mutex<Vec<StoreEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let id = store.subscribe(move |event| sink.lock().expect("sink").push(event.clone()));

    let conversation = store.create_conversation().expect("conversation");
    store
        .append_message(&conversation.id, user_message("m-1", "hi", "2024-05-01T10:00:00Z"))
        .expect("append");

    {
        let seen = events.lock().expect("events");
        assert_eq!(
            seen.as_slice(),
            [
                StoreEvent::ConversationUpserted {
                    conversation_id: conversation.id.clone()
                },
                StoreEvent::MessagesChanged {
                    conversation_id: conversation.id.clone()
                },
            ]
        );
    }

    store.unsubscribe(id);
    store
        .set_delivery(&conversation.id, "m-1", DeliveryStatus::Sent)
        .expect("delivery");
    assert_eq!(events.lock().expect("events").len(), 2);
}
