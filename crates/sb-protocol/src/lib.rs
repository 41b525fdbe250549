// sb-protocol: statebus wire protocol types and framing.
//
// All frames on both channels carry a top-level `kind` field for
// discriminated deserialization.  The reply channel speaks `Request` /
// `Reply`; the events channel speaks one `SubscribeFilter`, one
// `SubscribeAck`, then a stream of `ChangeEvent` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub mod codec;

pub use codec::{FramedStream, WireError, framed};

/// The hub's state: string keys to opaque JSON values.  Mutation is always
/// whole-value replacement at a key.
pub type StateMap = HashMap<String, Value>;

/// Keyword arguments for atomic handlers and dispatched tasks.
pub type Kwargs = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Endpoint discovery
// ---------------------------------------------------------------------------

/// Environment variable advertising the request/reply endpoint.
///
/// Written once at hub start (injected into spawned workers by whatever
/// supervises them); read once per proxy constructor.
pub const REPLY_ADDR_ENV: &str = "STATEBUS_REPLY_ADDR";

/// Environment variable advertising the change-event endpoint.
pub const EVENTS_ADDR_ENV: &str = "STATEBUS_EVENTS_ADDR";

// ---------------------------------------------------------------------------
// Client -> Hub requests
// ---------------------------------------------------------------------------

/// A single request on the reply channel.
///
/// `id` is a correlation id echoed verbatim in the matching `Reply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// All request kinds in the v1 protocol.
///
/// ```json
/// { "id": "…", "kind": "set", "key": "apples", "value": 5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    /// Read one key.  Never fails; absence is reported in the reply.
    Get { key: String },
    /// Read the full state plus the revision it was taken at.
    Snapshot,
    /// Replace the value at one key.
    Set { key: String, value: Value },
    /// Remove one key.  With `strict`, a missing key is a fault.
    Delete {
        key: String,
        #[serde(default)]
        strict: bool,
    },
    /// Replace several keys in one commit (one revision, one change record).
    Update { delta: StateMap },
    /// Run a named handler against the state with exclusive access.
    ///
    /// Handlers are registered on the hub up front; the wire carries only
    /// the name and serialized arguments, never code.
    Atomic {
        handler: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Kwargs,
    },
    /// Liveness probe; reply carries the hub identity and current revision.
    Ping,
    /// Ask the hub to stop serving.  The reply is sent before it stops.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Hub -> Client replies
// ---------------------------------------------------------------------------

/// A single reply on the reply channel, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    #[serde(flatten)]
    pub body: ReplyBody,
}

/// All reply kinds.  `Fault` stands in for any failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    /// Reply to `Get`.  `value` is null when `found` is false.
    Value { found: bool, value: Value },
    /// Reply to `Snapshot`.
    Snapshot { entries: StateMap, revision: u64 },
    /// Reply to `Set` / `Delete` / `Update`.
    ///
    /// `revision` is the commit revision, or the unchanged current revision
    /// when the mutation was a no-op (post-state equal to pre-state).
    Committed { revision: u64 },
    /// Reply to `Atomic`: the handler's return value plus the commit
    /// revision (current revision if the handler changed nothing).
    AtomicDone { returned: Value, revision: u64 },
    /// Reply to `Ping`.
    Pong { server_id: Uuid, revision: u64 },
    /// Reply to `Shutdown`.
    ShuttingDown,
    /// Any request that failed.
    Fault { fault: Fault },
}

/// Frozen v1 fault codes.
pub mod fault_codes {
    pub const KEY_MISSING: &str = "KEY_MISSING";
    pub const USER_ERROR: &str = "USER_ERROR";
    pub const UNKNOWN_HANDLER: &str = "UNKNOWN_HANDLER";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// A typed failure carried in a `Fault` reply.
///
/// | Code             | Meaning                                            |
/// |------------------|----------------------------------------------------|
/// | KEY_MISSING      | Strict get/delete on an absent key                 |
/// | USER_ERROR       | Atomic handler returned an error or panicked       |
/// | UNKNOWN_HANDLER  | Atomic request named an unregistered handler       |
/// | PROTOCOL_ERROR   | Malformed or out-of-contract request               |
/// | INTERNAL_ERROR   | Hub-side failure unrelated to the request contents |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// One of the frozen v1 fault codes.
    pub code: String,
    pub message: String,
    /// Opaque payload, e.g. the handler fault detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Fault {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Fault {
            code: code.to_owned(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ---------------------------------------------------------------------------
// Events channel
// ---------------------------------------------------------------------------

/// First frame a subscriber sends on the events channel.
///
/// `prefixes` narrows delivery to keys matching any listed prefix; `None`
/// subscribes to everything.  Prefix filtering is a transport-level
/// optimization only; subscribers must still re-filter in-process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeFilter {
    #[serde(default)]
    pub prefixes: Option<Vec<String>>,
}

impl SubscribeFilter {
    /// Subscribe to every change record.
    pub fn all() -> Self {
        SubscribeFilter { prefixes: None }
    }

    /// Subscribe to keys starting with `prefix` (an exact key is its own
    /// prefix; re-filter client-side for exactness).
    pub fn prefix(prefix: impl Into<String>) -> Self {
        SubscribeFilter {
            prefixes: Some(vec![prefix.into()]),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.prefixes {
            None => true,
            Some(prefixes) => prefixes.iter().any(|p| key.starts_with(p.as_str())),
        }
    }
}

/// Hub's acknowledgement of a `SubscribeFilter`.
///
/// Once received, every change record committed after the subscriber's next
/// hub round-trip is guaranteed to be delivered on this connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeAck {}

/// One key's transition within a change record.
///
/// `before`/`after` are null when the key did not exist on that side;
/// `existed_before`/`exists_after` disambiguate null values from absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    pub before: Value,
    pub after: Value,
    pub existed_before: bool,
    pub exists_after: bool,
}

impl KeyChange {
    pub fn from_transition(before: Option<Value>, after: Option<Value>) -> Self {
        KeyChange {
            existed_before: before.is_some(),
            exists_after: after.is_some(),
            before: before.unwrap_or(Value::Null),
            after: after.unwrap_or(Value::Null),
        }
    }

    /// The value visible at this key after the change, `None` if deleted.
    pub fn after_value(&self) -> Option<&Value> {
        self.exists_after.then_some(&self.after)
    }
}

/// The hub's description of what one revision changed.
///
/// Published exactly once per committed mutation, after the commit and
/// before the mutating client's reply.  `changes` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub revision: u64,
    pub changes: HashMap<String, KeyChange>,
}

impl ChangeEvent {
    pub fn touches(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }
}
