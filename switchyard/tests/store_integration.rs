//! Message store integration tests.
//!
//! Capacity accounting, sequence completion with duplicate detection,
//! expiry callback error handling, and concurrent group access guarded by
//! the lock registry.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use switchyard::*;
use switchyard_testkit::{correlated_message, sequenced_messages, text_message, RecordingCallback};

type Store = SimpleMessageStore<String, String>;

#[test]
fn capacity_is_enforced_until_a_message_is_removed() {
    let store = Store::with_capacity(3).expect("valid capacity");
    let stored: Vec<_> = (0..3)
        .map(|i| {
            store
                .add_message(text_message(&format!("m{i}")))
                .expect("within capacity")
        })
        .collect();

    let err = store.add_message(text_message("overflow")).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded { capacity: 3 }));
    assert_eq!(store.message_count(), 3);

    assert!(store.remove_message(stored[1].id()).is_some());
    assert!(store.add_message(text_message("fits")).is_ok());
    assert_eq!(store.remaining_capacity(), Some(0));
}

#[test]
fn zero_capacity_is_a_configuration_error() {
    assert!(Store::with_capacity(0).is_err());
    assert!(Store::from_config(&StoreConfig::default()).is_ok());
}

#[test]
fn list_returns_messages_with_the_correlation_id() {
    let store = Store::new();
    store.add_message(correlated_message("order-1", "a")).unwrap();
    store.add_message(correlated_message("order-1", "b")).unwrap();
    store.add_message(correlated_message("order-2", "c")).unwrap();
    store.add_message(text_message("loose")).unwrap();

    let mut payloads: Vec<String> = store
        .list("order-1")
        .iter()
        .map(|message| message.payload().clone())
        .collect();
    payloads.sort();
    assert_eq!(payloads, vec!["a".to_string(), "b".to_string()]);
    assert!(store.list("order-3").is_empty());
}

#[test]
fn sequence_completes_and_duplicates_are_ignored() {
    let store = Store::new();
    let key = "batch-7".to_string();
    let messages = sequenced_messages("batch-7", 3);

    let outcome = store.add_message_to_group(&key, messages[0].clone());
    assert!(outcome.accepted);
    assert!(!outcome.complete);
    store.add_message_to_group(&key, messages[1].clone());

    // Same sequence number as the second message: not a new member.
    let duplicate = Message::builder("again".to_string())
        .with_correlation_id("batch-7")
        .with_sequence(2, 3)
        .build();
    let outcome = store.add_message_to_group(&key, duplicate);
    assert!(!outcome.accepted);
    assert_eq!(outcome.size, 2);
    assert!(!outcome.complete);

    let outcome = store.add_message_to_group(&key, messages[2].clone());
    assert_eq!(outcome.size, 3);
    assert!(outcome.complete);

    let outcome = store.add_message_to_group(&key, messages[2].clone());
    assert!(!outcome.accepted);
    assert_eq!(outcome.size, 3);
    assert!(store.get_message_group(&key).is_complete());
}

#[test]
fn marking_moves_members_and_keeps_the_group() {
    let store = Store::new();
    let key = "agg".to_string();
    for message in sequenced_messages("agg", 2) {
        store.add_message_to_group(&key, message);
    }

    let mut group = store.get_message_group(&key);
    store.mark_message_group(&mut group);
    assert_eq!(group.unmarked().len(), 0);
    assert_eq!(group.marked().len(), 2);

    let stored = store.get_message_group(&key);
    assert_eq!(stored.marked().len(), 2);
    assert!(stored.unmarked().is_empty());
    assert_eq!(store.message_group_count(), 1);
}

#[test]
fn expiry_runs_every_callback_and_reports_the_first_failure() {
    let store = Store::new();
    let failing = RecordingCallback::<String>::failing("first callback broke");
    let recording = RecordingCallback::<String>::new();
    store.register_expiry_callback(Arc::new(failing.clone()));
    store.register_expiry_callback(Arc::new(recording.clone()));

    for key in ["g1", "g2"] {
        store.add_message_to_group(&key.to_string(), correlated_message(key, "payload"));
    }

    let err = store
        .expire_message_groups(chrono::Duration::milliseconds(-1))
        .unwrap_err();
    assert!(matches!(err, StoreError::ExpiryCallback(_)));

    let mut seen = recording.seen();
    seen.sort();
    assert_eq!(seen, vec!["g1".to_string(), "g2".to_string()]);
    assert_eq!(failing.call_count(), 2);
    assert_eq!(store.message_group_count(), 0);
}

#[test]
fn registering_the_same_callback_twice_runs_it_once() {
    let store = Store::new();
    let recording = RecordingCallback::<String>::new();
    let callback: Arc<dyn MessageGroupCallback<String, String>> = Arc::new(recording.clone());
    store.register_expiry_callback(Arc::clone(&callback));
    store.register_expiry_callback(callback);

    store.add_message_to_group(&"k".to_string(), text_message("x"));
    assert_eq!(
        store
            .expire_message_groups(chrono::Duration::milliseconds(-1))
            .expect("no failing callbacks"),
        1
    );
    assert_eq!(recording.call_count(), 1);
}

#[test]
fn young_groups_survive_expiry() {
    let store = Store::new();
    store.add_message_to_group(&"fresh".to_string(), text_message("x"));

    let expired = store
        .expire_message_groups(chrono::Duration::seconds(60))
        .expect("expire");
    assert_eq!(expired, 0);
    assert_eq!(store.message_group_count(), 1);
}

#[test]
fn concurrent_adds_build_a_single_group() {
    let store = Arc::new(Store::new());
    let key = "shared".to_string();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    store.add_message_to_group(&key, text_message(&format!("{worker}-{i}")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(store.message_group_count(), 1);
    assert_eq!(store.get_message_group(&key).size(), 200);
}

#[test]
fn lock_registry_serializes_release_of_a_group() {
    let store = Arc::new(Store::new());
    let locks = Arc::new(DefaultLockRegistry::default());
    let key = "release".to_string();
    for message in sequenced_messages("release", 4) {
        store.add_message_to_group(&key, message);
    }

    // Each worker checks the group and releases it at most once.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let locks = Arc::clone(&locks);
            let key = key.clone();
            thread::spawn(move || {
                locks.execute_locked(&key, || {
                    let mut group = store.get_message_group(&key);
                    if group.is_complete() && !group.unmarked().is_empty() {
                        store.mark_message_group(&mut group);
                        true
                    } else {
                        false
                    }
                })
            })
        })
        .collect();

    let releases = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .filter(|released| *released)
        .count();
    assert_eq!(releases, 1);
    assert_eq!(store.get_message_group(&key).marked().len(), 4);
}

#[test]
fn timed_lock_gives_up_while_another_thread_holds_the_key() {
    let locks = Arc::new(DefaultLockRegistry::new(0x0F).expect("valid mask"));
    let (held_tx, held_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let holder = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            locks.execute_locked("busy", || {
                held_tx.send(()).expect("signal held");
                release_rx.recv().expect("wait for release");
            })
        })
    };

    held_rx.recv().expect("holder started");
    let err = locks
        .execute_locked_timed("busy", Duration::from_millis(50), || ())
        .unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));

    release_tx.send(()).expect("release holder");
    holder.join().expect("holder panicked");
    assert!(locks
        .execute_locked_timed("busy", Duration::from_millis(50), || ())
        .is_ok());
}
