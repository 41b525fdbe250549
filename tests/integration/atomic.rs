//! Atomic handler execution: serialization under concurrency, fault
//! propagation, and isolation of failed handlers.

use sb_test_utils::{TestHub, basic_handlers};
use serde_json::{Value, json};
use statebus::protocol::Kwargs;
use statebus::{ClientError, HandlerFault, HandlerRegistry, Proxy, StateView};

/// Test: K concurrent clients incrementing one counter always land on
/// initial + K — the hub serializes every atomic call.
#[tokio::test]
async fn concurrent_increments_all_land() {
    let hub = TestHub::with_handlers(basic_handlers()).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let endpoints = hub.endpoints().clone();
        handles.push(tokio::spawn(async move {
            let mut proxy = Proxy::connect(&endpoints).await.unwrap();
            let mut revisions = Vec::new();
            for _ in 0..25 {
                let (_value, revision) = proxy
                    .atomic("incr", vec![json!("counter")], Kwargs::new())
                    .await
                    .unwrap();
                revisions.push(revision);
            }
            revisions
        }));
    }

    let mut all_revisions = Vec::new();
    for handle in handles {
        let revisions = handle.await.unwrap();
        // Program order per client.
        assert!(revisions.windows(2).all(|w| w[0] < w[1]));
        all_revisions.extend(revisions);
    }

    // Every commit got its own revision.
    all_revisions.sort_unstable();
    all_revisions.dedup();
    assert_eq!(all_revisions.len(), 200);

    let mut proxy = hub.proxy().await;
    assert_eq!(proxy.get("counter").await.unwrap(), Some(json!(200)));

    hub.stop().await;
}

/// Test: two workers interleaving 100 log appends each lose nothing.
#[tokio::test]
async fn interleaved_log_appends_preserve_every_entry() {
    let hub = TestHub::with_handlers(basic_handlers()).await;

    let mut handles = Vec::new();
    for id in ["a", "b"] {
        let endpoints = hub.endpoints().clone();
        handles.push(tokio::spawn(async move {
            let mut proxy = Proxy::connect(&endpoints).await.unwrap();
            for _ in 0..100 {
                proxy
                    .atomic("push", vec![json!("log"), json!(id)], Kwargs::new())
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut proxy = hub.proxy().await;
    let log = proxy.get("log").await.unwrap().unwrap();
    let entries = log.as_array().unwrap();
    assert_eq!(entries.len(), 200);
    for id in ["a", "b"] {
        let count = entries.iter().filter(|e| *e == &json!(id)).count();
        assert_eq!(count, 100, "id {id} must appear exactly 100 times");
    }

    hub.stop().await;
}

/// Test: the handler's return value and commit revision flow back.
#[tokio::test]
async fn return_value_flows_back() {
    let hub = TestHub::with_handlers(basic_handlers()).await;
    let mut proxy = hub.proxy().await;

    let (returned, revision) = proxy
        .atomic("incr", vec![json!("hits"), json!(5)], Kwargs::new())
        .await
        .unwrap();
    assert_eq!(returned, json!(5));
    assert_eq!(revision, 1);

    let (returned, revision) = proxy
        .atomic("incr", vec![json!("hits"), json!(2)], Kwargs::new())
        .await
        .unwrap();
    assert_eq!(returned, json!(7));
    assert_eq!(revision, 2);

    hub.stop().await;
}

fn reject(
    _state: &mut StateView<'_>,
    _args: &[Value],
    _kwargs: &Kwargs,
) -> Result<Value, HandlerFault> {
    Err(HandlerFault::new("rejected by policy").with_detail(json!({"policy": "none shall pass"})))
}

fn poison(
    state: &mut StateView<'_>,
    _args: &[Value],
    _kwargs: &Kwargs,
) -> Result<Value, HandlerFault> {
    state.set("poisoned", json!(true));
    panic!("handler blew up");
}

fn custom_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register("reject", reject);
    handlers.register("poison", poison);
    handlers
}

/// Test: a handler error reaches the caller as a typed user fault, and the
/// hub keeps serving.
#[tokio::test]
async fn handler_fault_reaches_the_caller() {
    let hub = TestHub::with_handlers(custom_handlers()).await;
    let mut proxy = hub.proxy().await;

    match proxy.atomic("reject", vec![], Kwargs::new()).await {
        Err(ClientError::User { message, detail }) => {
            assert_eq!(message, "rejected by policy");
            assert_eq!(detail, Some(json!({"policy": "none shall pass"})));
        }
        other => panic!("expected User fault, got {:?}", other),
    }

    proxy.set("still", json!("alive")).await.unwrap();
    assert_eq!(proxy.get("still").await.unwrap(), Some(json!("alive")));

    hub.stop().await;
}

/// Test: a panicking handler is contained — the caller gets a user fault,
/// the half-done mutation is discarded, the revision does not move.
#[tokio::test]
async fn handler_panic_is_contained() {
    let hub = TestHub::with_handlers(custom_handlers()).await;
    let mut proxy = hub.proxy().await;

    let before = proxy.ping().await.unwrap().revision;
    match proxy.atomic("poison", vec![], Kwargs::new()).await {
        Err(ClientError::User { message, .. }) => assert!(message.contains("panicked")),
        other => panic!("expected User fault, got {:?}", other),
    }
    assert_eq!(proxy.ping().await.unwrap().revision, before);
    assert_eq!(proxy.get("poisoned").await.unwrap(), None);

    hub.stop().await;
}

/// Test: naming an unregistered handler is a protocol-level error, not a
/// user fault.
#[tokio::test]
async fn unknown_handler_is_rejected() {
    let hub = TestHub::start().await;
    let mut proxy = hub.proxy().await;

    match proxy.atomic("nonesuch", vec![], Kwargs::new()).await {
        Err(ClientError::Protocol(message)) => assert!(message.contains("nonesuch")),
        other => panic!("expected Protocol error, got {:?}", other),
    }

    hub.stop().await;
}
