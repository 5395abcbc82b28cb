//! Connection status sequences and the fixed-delay reconnect

mod common;

use std::time::Duration;

use classify::{ConnectionManager, ConnectionStatus};
use common::{reserve_port, MockServer};
use tokio::sync::broadcast;
use tokio::time::timeout;

const RETRY: Duration = Duration::from_millis(50);

async fn next_status(rx: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_then_reopen_after_server_close() {
    let server = MockServer::start().await;
    let manager = ConnectionManager::new(server.socket_url(), RETRY, 16);
    let mut rx = manager.connect();

    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    assert!(server.wait_for_connections(1).await);

    server.kick();
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Closed);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    assert!(server.wait_for_connections(2).await);
    assert_eq!(manager.status(), ConnectionStatus::Open);

    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_server_keeps_retrying() {
    let port = reserve_port();
    let manager = ConnectionManager::new(format!("ws://127.0.0.1:{}/ws", port), RETRY, 16);
    let mut rx = manager.connect();

    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.push(next_status(&mut rx).await);
    }
    manager.disconnect();

    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_stops_retries() {
    let server = MockServer::start().await;
    let manager = ConnectionManager::new(server.socket_url(), RETRY, 16);
    let mut rx = manager.connect();
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    assert!(server.wait_for_connections(1).await);

    manager.disconnect();
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Closing);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Closed);

    tokio::time::sleep(RETRY * 4).await;
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(server.connections(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_while_live_opens_nothing_new() {
    let server = MockServer::start().await;
    let manager = ConnectionManager::new(server.socket_url(), RETRY, 16);
    let mut rx = manager.connect();
    let _again = manager.connect();

    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    assert!(server.wait_for_connections(1).await);

    manager.connect();
    tokio::time::sleep(RETRY * 2).await;
    assert_eq!(server.connections(), 1);

    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_after_disconnect_reopens() {
    let server = MockServer::start().await;
    let manager = ConnectionManager::new(server.socket_url(), RETRY, 16);
    let mut rx = manager.connect();
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    manager.disconnect();

    let mut rx = manager.connect();
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
    assert!(server.wait_for_connections(2).await);

    manager.disconnect();
}

#[tokio::test]
async fn test_disconnect_before_connect_is_silent() {
    let manager = ConnectionManager::new("ws://127.0.0.1:9/ws", RETRY, 16);
    let mut rx = manager.watch_status();
    manager.disconnect();
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(manager.status(), ConnectionStatus::None);
}
