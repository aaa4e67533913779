use std::sync::Arc;

use datalayer_core::{ConnectOptions, DataLayer, DataLayerError, ErrorKind, StoreError};
use serde_json::json;
use tokio::time::{sleep, timeout, Duration};

mod common;
use common::{fake_store::FakeStore, init_test_logging};

fn options_for_host(host: &str) -> ConnectOptions {
    serde_json::from_value(json!({ "host": host })).expect("options should deserialize")
}

#[tokio::test]
async fn acquire_connects_once_and_hands_back_the_session() {
    init_test_logging();

    let store = Arc::new(FakeStore::new("H1"));
    let data_layer = DataLayer::new(options_for_host("x"), store.clone());

    assert!(
        data_layer.get_connection().await.is_none(),
        "no connection before the first acquire"
    );

    let session = data_layer
        .acquire()
        .await
        .expect("acquire should succeed");

    let connection = session
        .get_connection()
        .await
        .expect("session should hold a connection");
    assert_eq!(connection.id(), "H1");
    assert_eq!(session.options().host, "x");
    assert_eq!(
        store.last_options().map(|o| o.host),
        Some("x".to_string()),
        "the stored options are handed to the store client"
    );

    // ── Already connected: no new attempt ────────────────────────────────
    data_layer
        .acquire()
        .await
        .expect("second acquire should succeed");
    assert_eq!(store.connect_calls(), 1);

    // The returned session is the same session, not a copy of its state.
    let via_original = data_layer.get_connection().await.expect("connected");
    assert_eq!(via_original.id(), "H1");
}

#[tokio::test]
async fn back_to_back_acquires_share_one_connect_attempt() {
    init_test_logging();

    let store = Arc::new(FakeStore::new("H1").gated());
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());

    let (first, second, ()) = tokio::join!(data_layer.acquire(), data_layer.acquire(), async {
        sleep(Duration::from_millis(20)).await;
        store.release();
    });

    first.expect("first acquire should succeed");
    second.expect("second acquire should succeed");
    assert_eq!(
        store.connect_calls(),
        1,
        "the store client must see exactly one connect"
    );
}

#[tokio::test]
async fn many_concurrent_acquires_all_get_the_same_connection() {
    init_test_logging();

    let store = Arc::new(FakeStore::new("H1").gated());
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());

    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let data_layer = data_layer.clone();
            tokio::spawn(async move { data_layer.acquire().await })
        })
        .collect();

    // Let every waiter reach the in-flight attempt before it resolves.
    sleep(Duration::from_millis(20)).await;
    store.release();

    for waiter in waiters {
        let session = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timed out waiting for acquire")
            .expect("acquire task panicked")
            .expect("acquire should succeed");
        let connection = session.get_connection().await.expect("connected");
        assert_eq!(connection.id(), "H1");
    }
    assert_eq!(store.connect_calls(), 1);
}

#[tokio::test]
async fn failed_connect_reports_a_connection_error() {
    init_test_logging();

    let refused = StoreError::Unavailable("Err1".into());
    let store = Arc::new(FakeStore::new("H1").failing(1, refused.clone()));
    let data_layer = DataLayer::new(options_for_host("x"), store.clone());

    let error = data_layer
        .acquire()
        .await
        .err()
        .expect("acquire should fail");

    assert_eq!(error.kind(), Some(ErrorKind::ConnectionError));
    assert_eq!(ErrorKind::ConnectionError.code(), 1);
    match &error {
        DataLayerError::Connection { source } => assert_eq!(source, &refused),
        other => panic!("expected a connection error, got {other:?}"),
    }
    assert!(
        error.to_string().contains("Unable to connect"),
        "message should say the connect failed: {error}"
    );
    assert!(data_layer.get_connection().await.is_none());
}

#[tokio::test]
async fn waiters_on_a_failed_attempt_all_see_the_failure() {
    init_test_logging();

    let refused = StoreError::Unavailable("Err1".into());
    let store = Arc::new(FakeStore::new("H1").failing(1, refused.clone()).gated());
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());

    let (first, second, ()) = tokio::join!(data_layer.acquire(), data_layer.acquire(), async {
        sleep(Duration::from_millis(20)).await;
        store.release();
    });

    for outcome in [first, second] {
        match outcome {
            Err(DataLayerError::Connection { source }) => assert_eq!(source, refused),
            Err(other) => panic!("expected a connection error, got {other:?}"),
            Ok(_) => panic!("acquire should fail"),
        }
    }
    assert_eq!(store.connect_calls(), 1);
}

#[tokio::test]
async fn acquire_after_a_failed_attempt_starts_a_new_one() {
    init_test_logging();

    let store = Arc::new(
        FakeStore::new("H1").failing(1, StoreError::Unavailable("first try".into())),
    );
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());

    data_layer
        .acquire()
        .await
        .err()
        .expect("first acquire should fail");

    // The failed attempt must not leave the session stuck in "connecting".
    let session = timeout(Duration::from_secs(1), data_layer.acquire())
        .await
        .expect("second acquire must not hang")
        .expect("second acquire should succeed");

    assert_eq!(store.connect_calls(), 2);
    assert!(session.get_connection().await.is_some());
}

#[tokio::test]
async fn abandoning_the_first_caller_does_not_strand_the_others() {
    init_test_logging();

    let store = Arc::new(FakeStore::new("H1").gated());
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());

    let first = tokio::spawn({
        let data_layer = data_layer.clone();
        async move { data_layer.acquire().await }
    });
    let second = tokio::spawn({
        let data_layer = data_layer.clone();
        async move { data_layer.acquire().await }
    });
    sleep(Duration::from_millis(20)).await;

    // ── Act ─ the caller that started the attempt goes away ─────────────
    first.abort();
    store.release();

    let session = timeout(Duration::from_secs(1), second)
        .await
        .expect("timed out waiting for the remaining caller")
        .expect("acquire task panicked")
        .expect("acquire should succeed");

    assert!(session.get_connection().await.is_some());
    assert_eq!(store.connect_calls(), 1);
}
