// sb-test-utils: shared test harness for the statebus suites.
//
// Starts a real hub in-process on ephemeral ports and hands out connected
// proxies, plus a couple of stock atomic handlers used across suites.

use hub::{HandlerFault, HandlerRegistry, Hub, HubConfig, StateView};
use sb_client::{Endpoints, Proxy};
use sb_protocol::Kwargs;
use serde_json::{Value, json};

/// An in-process hub bound to ephemeral loopback ports.
pub struct TestHub {
    hub: Hub,
    endpoints: Endpoints,
}

impl TestHub {
    /// Start a hub with no atomic handlers.
    pub async fn start() -> Self {
        Self::with_handlers(HandlerRegistry::new()).await
    }

    /// Start a hub serving the given atomic handlers.
    pub async fn with_handlers(handlers: HandlerRegistry) -> Self {
        let hub = Hub::start(HubConfig::default(), handlers)
            .await
            .expect("test hub start");
        let endpoints = Endpoints::new(hub.reply_addr(), hub.events_addr());
        TestHub { hub, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// A fresh proxy connected to this hub.
    pub async fn proxy(&self) -> Proxy {
        Proxy::connect(&self.endpoints).await.expect("proxy connect")
    }

    pub async fn stop(self) {
        self.hub.shutdown().await;
    }
}

/// Stock handlers: `incr key [by]` and `push key value`.
pub fn basic_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register("incr", incr);
    handlers.register("push", push);
    handlers
}

/// Add `args[1]` (default 1) to the integer at key `args[0]`.
fn incr(state: &mut StateView<'_>, args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerFault> {
    let key = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerFault::new("incr: key argument required"))?;
    let by = args.get(1).and_then(Value::as_i64).unwrap_or(1);
    let next = state.get(key).and_then(Value::as_i64).unwrap_or(0) + by;
    state.set(key.to_owned(), json!(next));
    Ok(json!(next))
}

/// Append `args[1]` to the array at key `args[0]`, creating it if needed.
fn push(state: &mut StateView<'_>, args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerFault> {
    let key = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerFault::new("push: key argument required"))?;
    let item = args
        .get(1)
        .cloned()
        .ok_or_else(|| HandlerFault::new("push: item argument required"))?;

    let mut list = match state.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(HandlerFault::new(format!(
                "push: '{key}' holds a non-array: {other}"
            )));
        }
        None => Vec::new(),
    };
    list.push(item);
    let len = list.len();
    state.set(key.to_owned(), Value::Array(list));
    Ok(json!(len))
}
