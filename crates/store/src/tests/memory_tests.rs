use super::*;

#[tokio::test]
async fn absent_key_reads_as_none() {
    let store = MemoryStore::new();
    assert_eq!(store.get("drone_status").await.expect("get"), None);
    assert_eq!(store.calls(), vec![StoreCall::Get("drone_status".into())]);
}

#[tokio::test]
async fn set_then_get_returns_value() {
    let store = MemoryStore::new();
    store.set("flight_mode", "manual").await.expect("set");
    assert_eq!(
        store.get("flight_mode").await.expect("get"),
        Some("manual".to_string())
    );
}

#[tokio::test]
async fn insert_is_not_recorded() {
    let store = MemoryStore::new();
    store.insert("controller_status", "connected");
    assert!(store.calls().is_empty());
    assert_eq!(store.value("controller_status").as_deref(), Some("connected"));
}

#[tokio::test]
async fn injected_read_failure_is_reported_and_recorded() {
    let store = MemoryStore::new();
    store.insert("drone_status", "flying");
    store.set_fail_reads(true);
    assert!(store.get("drone_status").await.is_err());
    assert_eq!(store.calls().len(), 1);

    store.set_fail_reads(false);
    assert_eq!(
        store.get("drone_status").await.expect("get").as_deref(),
        Some("flying")
    );
}

#[tokio::test]
async fn mutations_filters_reads() {
    let store = MemoryStore::new();
    store.get("a").await.expect("get");
    store.set("a", "1").await.expect("set");
    store.publish("ch", "m").await.expect("publish");
    assert_eq!(
        store.mutations(),
        vec![
            StoreCall::Set("a".into(), "1".into()),
            StoreCall::Publish("ch".into(), "m".into()),
        ]
    );
}

#[tokio::test]
async fn published_messages_reach_subscribers_in_order() {
    let store = MemoryStore::new();
    let mut stream = store.subscribe("ESTOP").await.expect("subscribe");
    assert_eq!(store.subscriber_count("ESTOP"), 1);

    store.publish("ESTOP", "first").await.expect("publish");
    store.publish("ESTOP", "second").await.expect("publish");

    assert_eq!(stream.next().await.as_deref(), Some("first"));
    assert_eq!(stream.next().await.as_deref(), Some("second"));
}

#[tokio::test]
async fn closing_channel_ends_stream() {
    let store = MemoryStore::new();
    let mut stream = store.subscribe("ESTOP").await.expect("subscribe");
    store.close_channel("ESTOP");
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn refused_subscription_is_an_error() {
    let store = MemoryStore::new();
    store.set_fail_subscribe(true);
    assert!(store.subscribe("ESTOP").await.is_err());
}
