//! Reactive reads.
//!
//! Every watcher follows the same skeleton: open a scoped subscription,
//! record the hub's revision R₀, optionally test the current state, then
//! consume change records in revision order and return on the first match
//! with revision strictly greater than R₀.
//!
//! Key-scoped watchers test the key's transition carried in each record.
//! Arbitrary predicates run client-side against a locally materialized
//! snapshot: seeded by one snapshot read, then updated by applying each
//! record (whole-value replacement, so replays are idempotent).  Predicates
//! are never shipped to the hub.

use crate::error::ClientError;
use crate::proxy::Proxy;
use crate::subscribe::Subscription;
use sb_protocol::{ChangeEvent, StateMap, SubscribeFilter};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// How a watcher registers and when it gives up.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// When true (the default) only a change record with revision greater
    /// than the registration revision can satisfy the watch; the current
    /// state never does.  Protects callers from stale satisfactions.
    pub live_only: bool,
    /// Deadline for the whole watch; expiry is [`ClientError::Timeout`].
    pub timeout: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            live_only: true,
            timeout: None,
        }
    }
}

impl WatchOptions {
    /// Satisfied only by a change after registration.
    pub fn live() -> Self {
        WatchOptions::default()
    }

    /// Also satisfied immediately by the current state.
    pub fn including_current() -> Self {
        WatchOptions {
            live_only: false,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fold one change record into a local snapshot.
pub(crate) fn apply_event(view: &mut StateMap, event: &ChangeEvent) {
    for (key, change) in &event.changes {
        if change.exists_after {
            view.insert(key.clone(), change.after.clone());
        } else {
            view.remove(key);
        }
    }
}

impl Proxy {
    /// Return the key's new value (or `None` on deletion) at the first
    /// revision after registration that touches it.
    pub async fn get_when_change(
        &mut self,
        key: &str,
        opts: WatchOptions,
    ) -> Result<Option<Value>, ClientError> {
        // A change watch cannot be satisfied by the current state.
        let opts = WatchOptions {
            live_only: true,
            ..opts
        };
        self.watch_key(key, &opts, |_| true).await
    }

    /// Return the full state right after the first revision, post
    /// registration, that touches any key.
    pub async fn get_when_any_change(
        &mut self,
        opts: WatchOptions,
    ) -> Result<StateMap, ClientError> {
        let opts = WatchOptions {
            live_only: true,
            ..opts
        };
        self.watch_state(&opts, |_| true).await
    }

    /// Return the value at the first revision where `state[key] == expected`.
    pub async fn get_when_equal(
        &mut self,
        key: &str,
        expected: &Value,
        opts: WatchOptions,
    ) -> Result<Value, ClientError> {
        let hit = self
            .watch_key(key, &opts, |value| value == Some(expected))
            .await?;
        present(hit)
    }

    /// Return the value at the first revision where the key exists with a
    /// value other than `unexpected`.
    pub async fn get_when_not_equal(
        &mut self,
        key: &str,
        unexpected: &Value,
        opts: WatchOptions,
    ) -> Result<Value, ClientError> {
        let hit = self
            .watch_key(key, &opts, |value| {
                value.is_some_and(|value| value != unexpected)
            })
            .await?;
        present(hit)
    }

    /// Return the value at the first revision where the key is present.
    pub async fn get_when_available(
        &mut self,
        key: &str,
        opts: WatchOptions,
    ) -> Result<Value, ClientError> {
        let hit = self.watch_key(key, &opts, |value| value.is_some()).await?;
        present(hit)
    }

    /// Return the first snapshot satisfying an arbitrary predicate,
    /// re-evaluated after every change record.
    pub async fn get_when(
        &mut self,
        opts: WatchOptions,
        predicate: impl FnMut(&StateMap) -> bool,
    ) -> Result<StateMap, ClientError> {
        self.watch_state(&opts, predicate).await
    }

    /// Key-scoped watcher skeleton.  The predicate sees the value visible at
    /// the key (`None` = absent): for the current state when registration
    /// allows it, and for each touching change record after that.
    async fn watch_key(
        &mut self,
        key: &str,
        opts: &WatchOptions,
        predicate: impl Fn(Option<&Value>) -> bool,
    ) -> Result<Option<Value>, ClientError> {
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let mut subscription =
            Subscription::open(self.endpoints(), SubscribeFilter::prefix(key)).await?;
        let registered = self.ping().await?.revision;

        if !opts.live_only {
            let current = self.get(key).await?;
            if predicate(current.as_ref()) {
                return Ok(current);
            }
        }

        loop {
            let event = next_event_before(&mut subscription, deadline).await?;
            if event.revision <= registered {
                continue;
            }
            // The transport filter is prefix-wide; re-match the exact key.
            let Some(change) = event.changes.get(key) else {
                continue;
            };
            if predicate(change.after_value()) {
                return Ok(change.after_value().cloned());
            }
        }
    }

    /// Snapshot-predicate watcher skeleton.
    async fn watch_state(
        &mut self,
        opts: &WatchOptions,
        mut predicate: impl FnMut(&StateMap) -> bool,
    ) -> Result<StateMap, ClientError> {
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let mut subscription = Subscription::open(self.endpoints(), SubscribeFilter::all()).await?;
        let (mut view, seeded_at) = self.snapshot().await?;

        if !opts.live_only && predicate(&view) {
            return Ok(view);
        }

        loop {
            let event = next_event_before(&mut subscription, deadline).await?;
            // Records up to the seed revision are already reflected in it.
            if event.revision <= seeded_at {
                continue;
            }
            apply_event(&mut view, &event);
            if predicate(&view) {
                return Ok(view);
            }
        }
    }
}

async fn next_event_before(
    subscription: &mut Subscription,
    deadline: Option<Instant>,
) -> Result<ChangeEvent, ClientError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, subscription.next_event())
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => subscription.next_event().await,
    }
}

fn present(hit: Option<Value>) -> Result<Value, ClientError> {
    hit.ok_or_else(|| ClientError::Protocol("matching change carried no value".to_owned()))
}
