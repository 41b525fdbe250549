//! The single-tasked state owner.
//!
//! Every connection task forwards decoded requests into one mpsc inbox; the
//! core drains it one request at a time.  No locks, no interleaving: a
//! request runs to completion (including an atomic handler call) before the
//! next is looked at.
//!
//! Commit protocol for mutating requests:
//! 1. compute the post-state and diff it against the pre-state by key,
//! 2. if the diff is empty, reply with the current revision and stop,
//! 3. otherwise bump the revision, publish the change record, then reply.
//!
//! Publishing before replying means that once a mutator sees its reply, the
//! record for that commit (and all earlier ones) is already queued to every
//! subscriber that was connected at commit time.

use crate::registry::{HandlerRegistry, StateView};
use sb_protocol::{
    ChangeEvent, Fault, KeyChange, Kwargs, Reply, ReplyBody, Request, RequestBody, StateMap,
    fault_codes,
};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One decoded request plus the channel its reply goes back on.
pub struct CoreRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// The canonical state and its revision counter.
pub struct Core {
    entries: StateMap,
    revision: u64,
    server_id: Uuid,
    handlers: Arc<HandlerRegistry>,
    events_tx: broadcast::Sender<ChangeEvent>,
}

/// Outcome of applying one request: the reply body, and the change record to
/// publish first (mutations with a non-empty diff only).
struct Applied {
    body: ReplyBody,
    event: Option<ChangeEvent>,
}

impl Applied {
    fn reply(body: ReplyBody) -> Self {
        Applied { body, event: None }
    }
}

impl Core {
    pub fn new(handlers: Arc<HandlerRegistry>, events_tx: broadcast::Sender<ChangeEvent>) -> Self {
        Core {
            entries: StateMap::new(),
            revision: 0,
            server_id: Uuid::new_v4(),
            handlers,
            events_tx,
        }
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    /// Drain the inbox until it closes or a shutdown request is served.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<CoreRequest>) {
        info!(server_id = %self.server_id, "state core running");
        while let Some(CoreRequest { request, reply }) = inbox.recv().await {
            let applied = self.apply(request.body);
            let stop = matches!(applied.body, ReplyBody::ShuttingDown);
            if let Some(event) = applied.event {
                debug!(
                    revision = event.revision,
                    keys = event.changes.len(),
                    "publishing change record"
                );
                let _ = self.events_tx.send(event);
            }
            let _ = reply.send(Reply {
                id: request.id,
                body: applied.body,
            });
            if stop {
                info!("shutdown requested; state core stopping");
                break;
            }
        }
    }

    fn apply(&mut self, body: RequestBody) -> Applied {
        match body {
            RequestBody::Get { key } => Applied::reply(match self.entries.get(&key) {
                Some(value) => ReplyBody::Value {
                    found: true,
                    value: value.clone(),
                },
                None => ReplyBody::Value {
                    found: false,
                    value: Value::Null,
                },
            }),
            RequestBody::Snapshot => Applied::reply(ReplyBody::Snapshot {
                entries: self.entries.clone(),
                revision: self.revision,
            }),
            RequestBody::Set { key, value } => {
                let (event, revision) = self.apply_delta(vec![(key, Some(value))]);
                Applied {
                    body: ReplyBody::Committed { revision },
                    event,
                }
            }
            RequestBody::Delete { key, strict } => {
                if strict && !self.entries.contains_key(&key) {
                    return Applied::reply(ReplyBody::Fault {
                        fault: Fault::new(fault_codes::KEY_MISSING, format!("no such key: {key}")),
                    });
                }
                let (event, revision) = self.apply_delta(vec![(key, None)]);
                Applied {
                    body: ReplyBody::Committed { revision },
                    event,
                }
            }
            RequestBody::Update { delta } => {
                let pairs = delta.into_iter().map(|(k, v)| (k, Some(v))).collect();
                let (event, revision) = self.apply_delta(pairs);
                Applied {
                    body: ReplyBody::Committed { revision },
                    event,
                }
            }
            RequestBody::Atomic {
                handler,
                args,
                kwargs,
            } => self.apply_atomic(&handler, &args, &kwargs),
            RequestBody::Ping => Applied::reply(ReplyBody::Pong {
                server_id: self.server_id,
                revision: self.revision,
            }),
            RequestBody::Shutdown => Applied::reply(ReplyBody::ShuttingDown),
        }
    }

    fn apply_atomic(&mut self, handler: &str, args: &[Value], kwargs: &Kwargs) -> Applied {
        let Some(f) = self.handlers.get(handler) else {
            return Applied::reply(ReplyBody::Fault {
                fault: Fault::new(
                    fault_codes::UNKNOWN_HANDLER,
                    format!("no handler registered as '{handler}'"),
                ),
            });
        };

        // The handler runs against a scratch copy: a fault or panic leaves
        // the committed state untouched.
        let mut scratch = self.entries.clone();
        let outcome = {
            let mut view = StateView::new(&mut scratch);
            catch_unwind(AssertUnwindSafe(|| f(&mut view, args, kwargs)))
        };

        match outcome {
            Ok(Ok(returned)) => {
                let (event, revision) = self.commit_replace(scratch);
                Applied {
                    body: ReplyBody::AtomicDone { returned, revision },
                    event,
                }
            }
            Ok(Err(fault)) => {
                warn!(handler, error = %fault.message, "atomic handler fault");
                let mut wire = Fault::new(fault_codes::USER_ERROR, fault.message);
                if let Some(detail) = fault.detail {
                    wire = wire.with_detail(detail);
                }
                Applied::reply(ReplyBody::Fault { fault: wire })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(handler, panic = %message, "atomic handler panicked");
                Applied::reply(ReplyBody::Fault {
                    fault: Fault::new(
                        fault_codes::USER_ERROR,
                        format!("handler '{handler}' panicked: {message}"),
                    ),
                })
            }
        }
    }

    /// Apply a keyed delta (`None` deletes).  Unchanged pairs drop out of the
    /// diff; an all-unchanged delta commits nothing.
    fn apply_delta(&mut self, pairs: Vec<(String, Option<Value>)>) -> (Option<ChangeEvent>, u64) {
        let mut changes = HashMap::new();
        for (key, next) in pairs {
            let before = self.entries.get(&key).cloned();
            if before.as_ref() == next.as_ref() {
                continue;
            }
            match &next {
                Some(value) => {
                    self.entries.insert(key.clone(), value.clone());
                }
                None => {
                    self.entries.remove(&key);
                }
            }
            changes.insert(key, KeyChange::from_transition(before, next));
        }
        self.finish_commit(changes)
    }

    /// Replace the whole state with `post`, committing the by-key diff.
    fn commit_replace(&mut self, post: StateMap) -> (Option<ChangeEvent>, u64) {
        let mut changes = HashMap::new();
        for (key, after) in &post {
            if self.entries.get(key) != Some(after) {
                changes.insert(
                    key.clone(),
                    KeyChange::from_transition(self.entries.get(key).cloned(), Some(after.clone())),
                );
            }
        }
        for (key, before) in &self.entries {
            if !post.contains_key(key) {
                changes.insert(
                    key.clone(),
                    KeyChange::from_transition(Some(before.clone()), None),
                );
            }
        }
        if changes.is_empty() {
            return (None, self.revision);
        }
        self.entries = post;
        self.finish_commit(changes)
    }

    fn finish_commit(&mut self, changes: HashMap<String, KeyChange>) -> (Option<ChangeEvent>, u64) {
        if changes.is_empty() {
            return (None, self.revision);
        }
        self.revision += 1;
        (
            Some(ChangeEvent {
                revision: self.revision,
                changes,
            }),
            self.revision,
        )
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
