//! Named atomic handlers.
//!
//! The wire never carries code.  An embedding program registers its atomic
//! functions by name before the hub starts; an `Atomic` request names one of
//! them and ships only serialized arguments.  Naming an unregistered handler
//! is an explicit fault, which is also what becomes of a closure someone
//! expected to ship implicitly.

use sb_protocol::{Kwargs, StateMap};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A failure raised inside an atomic handler.
///
/// Travels back to the caller as a `USER_ERROR` fault; the hub itself never
/// fails on one.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerFault {
    pub message: String,
    pub detail: Option<Value>,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerFault {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A mutable view of the state handed to an atomic handler.
///
/// The handler sees (a scratch copy of) the full state and mutates it
/// freely; the core diffs the result and commits all of it at one revision.
pub struct StateView<'a> {
    entries: &'a mut StateMap,
}

impl<'a> StateView<'a> {
    pub(crate) fn new(entries: &'a mut StateMap) -> Self {
        StateView { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Remove a key, returning its previous value if it existed.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn entries(&self) -> &StateMap {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type HandlerFn =
    dyn Fn(&mut StateView<'_>, &[Value], &Kwargs) -> Result<Value, HandlerFault> + Send + Sync;

/// Registry of named atomic handlers, frozen once the hub starts.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerFn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut StateView<'_>, &[Value], &Kwargs) -> Result<Value, HandlerFault>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<HandlerFn>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
