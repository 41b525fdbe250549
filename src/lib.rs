//! statebus: shared, observable key-value state for cooperating workers on
//! one host.
//!
//! One hub process owns the state and is its sole mutator; every commit
//! gets a monotonically increasing revision and exactly one published
//! change record.  Workers attach through per-task proxies for mapping
//! operations, reactive watches, named atomic transactions, and an ordered
//! process map over a worker pool.
//!
//! This crate is the facade: it re-exports the protocol, client, hub, and
//! dispatch crates under one roof.

pub use sb_client::{ClientError, Endpoints, Proxy, Subscription, WatchOptions};
pub use sb_dispatch::{
    MapItemError, MapOptions, ResultStream, TaskFault, TaskRegistry, process_map, run_worker,
};
pub use sb_protocol as protocol;

pub use hub::{HandlerFault, HandlerRegistry, Hub, HubConfig, StateView};
