use super::*;
use shared::domain::EventKind;
use tokio::sync::mpsc::error::TryRecvError;

fn open_connection(manager: &ConnectionManager) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
    let (id, receiver) = manager.register();
    assert!(manager.mark_open(id));
    (id, receiver)
}

fn status(value: &str) -> OutboundEvent {
    OutboundEvent::new(EventKind::ControllerStatus, Some(value.into()))
}

#[test]
fn registered_connection_waits_in_connecting() {
    let manager = ConnectionManager::new(8);
    let (id, mut receiver) = manager.register();
    assert_eq!(manager.state(id), ConnectionState::Connecting);

    assert_eq!(manager.broadcast(&status("connected")), 0);
    assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn mark_open_promotes_only_once() {
    let manager = ConnectionManager::new(8);
    let (id, _receiver) = manager.register();
    assert!(manager.mark_open(id));
    assert_eq!(manager.state(id), ConnectionState::Open);
    assert!(!manager.mark_open(id));
    assert!(!manager.mark_open(ConnectionId(999)));
}

#[test]
fn broadcast_reaches_every_open_connection() {
    let manager = ConnectionManager::new(8);
    let (_a, mut rx_a) = open_connection(&manager);
    let (_b, mut rx_b) = open_connection(&manager);

    assert_eq!(manager.broadcast(&status("connected")), 2);

    let expected = r#"{"type":"controller_status","value":"connected"}"#;
    assert_eq!(&*rx_a.try_recv().expect("frame a"), expected);
    assert_eq!(&*rx_b.try_recv().expect("frame b"), expected);
}

#[test]
fn full_queue_closes_only_the_slow_connection() {
    let manager = ConnectionManager::new(1);
    let (slow, _slow_rx) = open_connection(&manager);
    let (fast, mut fast_rx) = open_connection(&manager);

    assert_eq!(manager.broadcast(&status("one")), 2);
    fast_rx.try_recv().expect("first frame");

    assert_eq!(manager.broadcast(&status("two")), 1);
    assert_eq!(manager.state(slow), ConnectionState::Closed);
    assert_eq!(manager.state(fast), ConnectionState::Open);
    fast_rx.try_recv().expect("second frame");

    assert_eq!(manager.broadcast(&status("three")), 1);
    assert_eq!(manager.open_count(), 1);
}

#[test]
fn dropped_receiver_is_removed_without_error() {
    let manager = ConnectionManager::new(8);
    let (gone, gone_rx) = open_connection(&manager);
    let (_kept, mut kept_rx) = open_connection(&manager);
    drop(gone_rx);

    assert_eq!(manager.broadcast(&status("connected")), 1);
    assert_eq!(manager.state(gone), ConnectionState::Closed);
    assert!(kept_rx.try_recv().is_ok());
}

#[test]
fn closing_connection_leaves_broadcast_set() {
    let manager = ConnectionManager::new(8);
    let (id, mut receiver) = open_connection(&manager);
    manager.begin_close(id);

    assert_eq!(manager.state(id), ConnectionState::Closing);
    assert_eq!(manager.broadcast(&status("connected")), 0);
    assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn deregister_is_idempotent() {
    let manager = ConnectionManager::new(8);
    let (id, _receiver) = open_connection(&manager);
    assert!(manager.deregister(id));
    assert!(!manager.deregister(id));
    assert_eq!(manager.state(id), ConnectionState::Closed);
}

#[test]
fn close_all_ends_every_outbound_queue() {
    let manager = ConnectionManager::new(8);
    let (_a, mut rx_a) = open_connection(&manager);
    let (_b, mut rx_b) = manager.register();

    assert_eq!(manager.close_all(), 2);
    assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Disconnected)));
    assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Disconnected)));
    assert_eq!(manager.open_count(), 0);
}

#[test]
fn reconnecting_client_gets_a_fresh_id() {
    let manager = ConnectionManager::new(8);
    let (first, _rx) = open_connection(&manager);
    manager.deregister(first);

    let (second, _rx) = manager.register();
    assert_ne!(first, second);
    assert_eq!(manager.state(second), ConnectionState::Connecting);
}
