mod common;

use crate::common::*;
use std::sync::Arc;
use zodiac_chat_lib::{ChangeFeed, InMemoryStore, MessageStore};

#[tokio::test]
async fn receiver_is_notified_of_new_message() {
    let db = sqlite_store();
    let (alice, bob) = (user("alice"), user("bob"));
    let (listener, mut bob_inbox) = channel_listener();
    let _subscription = db.store.subscribe(&bob, &alice, listener).await.unwrap();

    db.store.append(&alice, &bob, "hello").await.unwrap();

    let fetched = db.store.fetch_conversation(&alice, &bob).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].sender_id, alice);
    assert_eq!(fetched[0].body, "hello");

    let delivered = next_message(&mut bob_inbox).await;
    assert_eq!(delivered.body, "hello");
    assert_eq!(delivered.sender_id, alice);
    assert_eq!(delivered.id, fetched[0].id);
    assert_no_delivery(&mut bob_inbox).await;
}

#[tokio::test]
async fn history_is_not_replayed_to_new_subscribers() {
    let store = InMemoryStore::new();
    let (alice, bob) = (user("alice"), user("bob"));
    store.append(&alice, &bob, "before subscribing").await.unwrap();

    let (listener, mut inbox) = channel_listener();
    let _subscription = store.subscribe(&alice, &bob, listener).await.unwrap();
    assert_no_delivery(&mut inbox).await;

    store.append(&bob, &alice, "after subscribing").await.unwrap();
    assert_eq!(next_message(&mut inbox).await.body, "after subscribing");
}

#[tokio::test]
async fn other_conversations_are_filtered_out() {
    let store = InMemoryStore::new();
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
    let (listener, mut inbox) = channel_listener();
    let _subscription = store.subscribe(&alice, &bob, listener).await.unwrap();

    store.append(&alice, &carol, "not yours").await.unwrap();
    store.append(&carol, &bob, "nor this").await.unwrap();
    assert_no_delivery(&mut inbox).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_are_delivered_once_in_commit_order() {
    let db = sqlite_store();
    let (alice, bob) = (user("alice"), user("bob"));
    let (listener, mut inbox) = channel_listener();
    let _subscription = db.store.subscribe(&alice, &bob, listener).await.unwrap();

    let mut writers = Vec::new();
    for (from, to) in [(alice.clone(), bob.clone()), (bob.clone(), alice.clone())] {
        let store = db.store.clone();
        writers.push(tokio::spawn(async move {
            for n in 0..20 {
                store.append(&from, &to, &format!("{} #{}", from, n)).await.unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let mut delivered = Vec::new();
    for _ in 0..40 {
        delivered.push(next_message(&mut inbox).await);
    }
    assert_no_delivery(&mut inbox).await;

    let fetched = db.store.fetch_conversation(&alice, &bob).await.unwrap();
    assert_eq!(delivered, fetched);
}

#[tokio::test]
async fn unsubscribe_stops_callbacks_and_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, bob) = (user("alice"), user("bob"));
    let (listener, mut inbox) = channel_listener();
    let subscription = store.subscribe(&bob, &alice, listener).await.unwrap();
    assert_eq!(store.feed().subscriber_count(), 1);

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert!(!subscription.is_active());
    assert_eq!(store.feed().subscriber_count(), 0);

    store.append(&alice, &bob, "anyone there?").await.unwrap();
    assert_no_delivery(&mut inbox).await;
}

#[tokio::test]
async fn dropping_the_handle_unsubscribes() {
    let store = InMemoryStore::new();
    let (listener, mut inbox) = channel_listener();
    {
        let _subscription = store
            .subscribe(&user("alice"), &user("bob"), listener)
            .await
            .unwrap();
        assert_eq!(store.feed().subscriber_count(), 1);
    }
    assert_eq!(store.feed().subscriber_count(), 0);

    store.append(&user("alice"), &user("bob"), "echo").await.unwrap();
    assert_no_delivery(&mut inbox).await;
}

#[tokio::test]
async fn both_participants_are_notified() {
    let store = InMemoryStore::new();
    let (alice, bob) = (user("alice"), user("bob"));
    let (alice_listener, mut alice_inbox) = channel_listener();
    let (bob_listener, mut bob_inbox) = channel_listener();
    let _alice_subscription = store.subscribe(&alice, &bob, alice_listener).await.unwrap();
    let _bob_subscription = store.subscribe(&bob, &alice, bob_listener).await.unwrap();

    let sent = store.append(&alice, &bob, "to both of us").await.unwrap();

    assert_eq!(next_message(&mut alice_inbox).await, sent);
    assert_eq!(next_message(&mut bob_inbox).await, sent);
}
