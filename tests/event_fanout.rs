//! Pushed events through the connection and the dispatcher

mod common;

use std::time::Duration;

use classify::{ClientError, ConnectionManager, EventDispatcher, Subscription};
use common::MockServer;
use serde_json::json;
use tokio::time::timeout;

async fn next(sub: &mut Subscription) -> classify::ServerEvent {
    timeout(Duration::from_secs(3), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("dispatcher gone")
}

async fn connected(server: &MockServer, dispatcher: &EventDispatcher) -> ConnectionManager {
    let manager = ConnectionManager::new(server.socket_url(), Duration::from_millis(50), 64);
    dispatcher.attach(manager.event_feed());
    manager.connect();
    assert!(server.wait_for_connections(1).await);
    manager
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_prefixes_each_receive_once() {
    let server = MockServer::start().await;
    let dispatcher = EventDispatcher::new();
    let mut all = dispatcher.subscribe("all", "collection").unwrap();
    let mut alpha = dispatcher.subscribe("alpha", "collection/alpha").unwrap();
    let manager = connected(&server, &dispatcher).await;

    server.push_event("collection/alpha/items", json!({"name": "a"}));
    server.push_event("collection/beta/items", json!({"name": "b"}));

    assert_eq!(next(&mut all).await.topic, "collection/alpha/items");
    assert_eq!(next(&mut all).await.topic, "collection/beta/items");

    let got = next(&mut alpha).await;
    assert_eq!(got.topic, "collection/alpha/items");
    assert_eq!(got.payload, json!({"name": "a"}));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alpha.try_recv().is_none());
    assert!(all.try_recv().is_none());

    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_arrive_in_transport_order() {
    let server = MockServer::start().await;
    let dispatcher = EventDispatcher::new();
    let mut sub = dispatcher.subscribe("ordered", "import").unwrap();
    let manager = connected(&server, &dispatcher).await;

    for i in 0..20 {
        server.push_event("import/movies", json!({ "seq": i }));
    }
    for i in 0..20 {
        assert_eq!(next(&mut sub).await.payload, json!({ "seq": i }));
    }

    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_beyond_capacity_loses_nothing() {
    let server = MockServer::start().await;
    let dispatcher = EventDispatcher::new();
    let mut sub = dispatcher.subscribe("everything", "").unwrap();
    let manager = ConnectionManager::new(server.socket_url(), Duration::from_millis(50), 8);
    dispatcher.attach(manager.event_feed());
    manager.connect();
    assert!(server.wait_for_connections(1).await);

    for i in 0..200 {
        server.push_event("import/x", json!({ "seq": i }));
    }
    for i in 0..200 {
        assert_eq!(next(&mut sub).await.payload, json!({ "seq": i }));
    }

    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_frames_are_skipped() {
    let server = MockServer::start().await;
    let dispatcher = EventDispatcher::new();
    let mut sub = dispatcher.subscribe("everything", "").unwrap();
    let manager = connected(&server, &dispatcher).await;

    server.push_raw("not json at all");
    server.push_raw(r#"{"data": {"no": "event"}}"#);
    server.push_event("start", json!(null));

    let event = next(&mut sub).await;
    assert_eq!(event.topic, "start");
    assert_eq!(event.payload, json!(null));

    manager.disconnect();
}

#[tokio::test]
async fn test_duplicate_key_rejected_until_dropped() {
    let dispatcher = EventDispatcher::new();
    let first = dispatcher.subscribe("ui", "collection").unwrap();

    let err = dispatcher.subscribe("ui", "import").err().unwrap();
    assert!(matches!(err, ClientError::DuplicateSubscriber { .. }));
    assert_eq!(dispatcher.subscriber_count(), 1);

    drop(first);
    assert!(!dispatcher.is_registered("ui"));
    let again = dispatcher.subscribe("ui", "import").unwrap();
    assert_eq!(again.name(), "ui");
}
