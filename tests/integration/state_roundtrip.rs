//! State mapping operations end to end: reads, writes, deletes, bulk
//! updates, snapshots, hub identity, and remote shutdown.

use sb_test_utils::TestHub;
use serde_json::json;
use statebus::ClientError;
use statebus::protocol::StateMap;

/// Test: set then get returns the written value.
#[tokio::test]
async fn set_then_get_round_trips() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    proxy.set("apples", json!(5)).await.unwrap();
    assert_eq!(proxy.get("apples").await.unwrap(), Some(json!(5)));

    hub.stop().await;
}

/// Test: representative value shapes survive the wire unchanged.
#[tokio::test]
async fn values_of_every_shape_round_trip() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    let shapes = vec![
        json!(null),
        json!(true),
        json!(42),
        json!(-7.5),
        json!("text with\nnewlines and ünïcode"),
        json!([1, "two", null, [3]]),
        json!({"nested": {"list": [1, 2]}, "flag": false}),
    ];
    for (i, value) in shapes.iter().enumerate() {
        let key = format!("shape/{i}");
        proxy.set(&key, value.clone()).await.unwrap();
        assert_eq!(proxy.get(&key).await.unwrap().as_ref(), Some(value));
    }

    hub.stop().await;
}

/// Test: an absent key reads as `None`, distinct from a stored null.
#[tokio::test]
async fn absent_key_reads_as_none() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    assert_eq!(proxy.get("missing").await.unwrap(), None);
    proxy.set("nothing", json!(null)).await.unwrap();
    assert_eq!(proxy.get("nothing").await.unwrap(), Some(json!(null)));

    hub.stop().await;
}

/// Test: lenient delete is a quiet no-op on absent keys; strict delete is a
/// typed failure.
#[tokio::test]
async fn delete_variants_differ_on_missing_keys() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    proxy.set("pears", json!(3)).await.unwrap();
    let revision = proxy.delete("pears").await.unwrap();
    assert_eq!(revision, 2);
    assert_eq!(proxy.get("pears").await.unwrap(), None);

    // No-op delete: revision must not move.
    assert_eq!(proxy.delete("pears").await.unwrap(), 2);
    assert_eq!(proxy.ping().await.unwrap().revision, 2);

    match proxy.delete_strict("pears").await {
        Err(ClientError::KeyMissing(message)) => assert!(message.contains("pears")),
        other => panic!("expected KeyMissing, got {:?}", other),
    }

    hub.stop().await;
}

/// Test: a bulk update lands at a single revision.
#[tokio::test]
async fn bulk_update_commits_once() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    let before = proxy.ping().await.unwrap().revision;
    let delta: StateMap = [
        ("a".to_owned(), json!(1)),
        ("b".to_owned(), json!(2)),
        ("c".to_owned(), json!(3)),
    ]
    .into_iter()
    .collect();
    let committed = proxy.update(delta).await.unwrap();
    assert_eq!(committed, before + 1);
    assert_eq!(proxy.ping().await.unwrap().revision, before + 1);

    hub.stop().await;
}

/// Test: a snapshot carries the full state and the revision it was taken at.
#[tokio::test]
async fn snapshot_reflects_state_and_revision() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    proxy.set("a", json!(1)).await.unwrap();
    proxy.set("b", json!([2, 3])).await.unwrap();

    let (entries, revision) = proxy.snapshot().await.unwrap();
    assert_eq!(revision, 2);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.get("a"), Some(&json!(1)));
    assert_eq!(entries.get("b"), Some(&json!([2, 3])));

    hub.stop().await;
}

/// Test: every proxy sees the same hub identity.
#[tokio::test]
async fn ping_identity_is_stable_across_proxies() {
    let hub = TestHub::start().await;
    let mut first = hub.proxy().await;
    let mut second = hub.proxy().await;

    let a = first.ping().await.unwrap();
    let b = second.ping().await.unwrap();
    assert_eq!(a.server_id, b.server_id);
    assert_eq!(a.server_id, hub.hub().server_id());

    hub.stop().await;
}

/// Test: a hub that accepts but never replies trips the per-request
/// liveness timeout as a transport error.
#[tokio::test]
async fn unresponsive_hub_times_out_requests() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sink = tokio::spawn(async move {
        // Accept and hold the connection open without ever answering.
        let _held = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let endpoints = statebus::Endpoints::new(addr, addr);
    let mut proxy = statebus::Proxy::connect(&endpoints)
        .await
        .unwrap()
        .with_request_timeout(std::time::Duration::from_millis(100));
    match proxy.ping().await {
        Err(ClientError::Transport(_)) => {}
        other => panic!("expected Transport error, got {:?}", other),
    }

    sink.abort();
}

/// Test: a shutdown request stops the hub; later operations fail with a
/// transport error instead of hanging.
#[tokio::test]
async fn shutdown_request_stops_the_hub() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    proxy.set("apples", json!(5)).await.unwrap();
    proxy.shutdown_hub().await.unwrap();

    match proxy.get("apples").await {
        Err(ClientError::Transport(_)) => {}
        other => panic!("expected Transport error after shutdown, got {:?}", other),
    }
}
