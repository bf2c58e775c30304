//! Concurrency tests for the event logs and the stream multiplexer.
//!
//! These tests verify that concurrent writers never share an index, that
//! segments stay in index order under contention, and that concurrent
//! listeners each resolve exactly once.

use courier_events::{CancelSignal, Counter, FanInLog, FanOutLog, SignalBuffer, StreamMux};
use courier_types::{Event, EventContent, EventId, EventInfo, Id, IndexedEvent, RoomId, UserId};
use std::collections::HashSet;
use std::sync::Arc;

fn info(n: usize) -> EventInfo {
    EventInfo::new(
        Id::from(RoomId::new("room", "test")),
        EventId::new(&format!("event{n}"), "test"),
        UserId::new("tester", "test"),
        "m.test",
    )
}

fn user(name: &str) -> Id {
    Id::from(UserId::new(name, "test"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_out_writes_get_unique_ordered_indices() {
    let log = Arc::new(FanOutLog::new(Arc::new(Counter::new(0))));
    let mut handles = Vec::new();

    for n in 0..200 {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            let recipients = [user("shared"), user(&format!("user_{}", n % 4))];
            log.send(info(n), &recipients).expect("send should succeed")
        }));
    }

    let mut indices = HashSet::new();
    for handle in handles {
        let index = handle.await.expect("task should not panic");
        assert!(indices.insert(index), "index {index} assigned twice");
    }
    assert_eq!(indices, (0..200).collect::<HashSet<u64>>());
    assert_eq!(log.max(), 200);

    // The shared segment saw every write, in index order.
    let selection = log
        .select_forwards(&user("shared"), 0, 200)
        .expect("select should succeed");
    assert_eq!(selection.events.len(), 200);
    assert_eq!((selection.from, selection.to), (0, 200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logs_sharing_a_counter_never_collide() {
    let counter = Arc::new(Counter::new(0));
    let fan_in = Arc::new(FanInLog::new(counter.clone()));
    let signals = Arc::new(SignalBuffer::new(counter.clone()));
    let mut handles = Vec::new();

    for n in 0..100 {
        let fan_in = fan_in.clone();
        let signals = signals.clone();
        handles.push(tokio::spawn(async move {
            let a = fan_in.send(info(n), &user("u")).expect("send should succeed");
            let b = signals
                .push_signal(info(n + 1000), &[user("u")])
                .expect("push should succeed");
            [a, b]
        }));
    }

    let mut indices = HashSet::new();
    for handle in handles {
        for index in handle.await.expect("task should not panic") {
            assert!(indices.insert(index), "index {index} assigned twice");
        }
    }
    assert_eq!(indices.len(), 200);
    assert_eq!(counter.current(), 200);

    let selection = fan_in
        .select_forwards(&[user("u")], 0, 200)
        .expect("select should succeed");
    assert_eq!(selection.events.len(), 100);
    let backwards = fan_in
        .select_backwards(&user("u"), 1000, 0)
        .expect("select should succeed");
    assert_eq!(backwards.events.len(), 100);
    assert_eq!(backwards.from, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_listeners_resolve_exactly_once() {
    let mux = Arc::new(StreamMux::new());
    let cancel = CancelSignal::new();
    let recipient = UserId::new("listener", "test");

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let listener = mux.listen(&recipient, &cancel).expect("listen should succeed");
        waiters.push(tokio::spawn(listener.wait()));
    }

    let event = IndexedEvent::new(
        0,
        Arc::new(Event::new(
            EventId::new("e0", "test"),
            Some(RoomId::new("room", "test")),
            UserId::new("tester", "test"),
            EventContent::Message {
                msgtype: "m.text".to_string(),
                body: "hello".to_string(),
            },
        )),
    );

    let mut senders = Vec::new();
    for _ in 0..4 {
        let mux = mux.clone();
        let recipient = recipient.clone();
        let event = event.clone();
        senders.push(tokio::spawn(async move {
            mux.send(&[recipient], &event).expect("send should succeed");
        }));
    }
    for handle in senders {
        handle.await.expect("send task should not panic");
    }
    cancel.cancel();

    let mut delivered = 0;
    for waiter in waiters {
        if waiter.await.expect("waiter should not panic").is_some() {
            delivered += 1;
        }
    }
    assert_eq!(delivered, 4, "each send should satisfy exactly one listener");
}
