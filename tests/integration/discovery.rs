//! Endpoint discovery through inherited environment variables.
//!
//! Lookups are injected so the suites never mutate the process environment;
//! `Endpoints::from_env` is the same resolution over `std::env::var`.

use sb_test_utils::TestHub;
use serde_json::json;
use statebus::protocol::{EVENTS_ADDR_ENV, REPLY_ADDR_ENV};
use statebus::{ClientError, Endpoints, Proxy};
use std::collections::HashMap;

/// Test: a worker with no inherited endpoint variables gets a typed
/// not-configured error naming the missing variable.
#[tokio::test]
async fn unconfigured_worker_gets_a_typed_error() {
    match Endpoints::from_lookup(|_| None) {
        Err(ClientError::NotConfigured(message)) => {
            assert!(message.contains(REPLY_ADDR_ENV));
        }
        other => panic!("expected NotConfigured, got {:?}", other),
    }
}

/// Test: a malformed endpoint value is rejected as not-configured, not
/// passed through to a doomed connect.
#[tokio::test]
async fn malformed_endpoint_is_rejected() {
    let vars: HashMap<&str, String> = [
        (REPLY_ADDR_ENV, "nonsense".to_owned()),
        (EVENTS_ADDR_ENV, "127.0.0.1:1".to_owned()),
    ]
    .into_iter()
    .collect();
    let result = Endpoints::from_lookup(|name| vars.get(name).cloned());
    assert!(matches!(result, Err(ClientError::NotConfigured(_))));
}

/// Test: the pairs a hub advertises resolve back into working endpoints —
/// both channels, full round trip plus a watch.
#[tokio::test]
async fn advertised_pairs_build_a_working_proxy() {
    let hub = TestHub::start().await;

    let vars: HashMap<String, String> = hub
        .hub()
        .env_pairs()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect();
    let endpoints = Endpoints::from_lookup(|name| vars.get(name).cloned()).unwrap();
    assert_eq!(&endpoints, hub.endpoints());

    let mut proxy = Proxy::connect(&endpoints).await.unwrap();
    proxy.set("via-env", json!(1)).await.unwrap();
    assert_eq!(proxy.get("via-env").await.unwrap(), Some(json!(1)));

    // The events endpoint resolves too: a watch satisfied by current state.
    let value = proxy
        .get_when_available("via-env", statebus::WatchOptions::including_current())
        .await
        .unwrap();
    assert_eq!(value, json!(1));

    hub.stop().await;
}
