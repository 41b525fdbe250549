//! hub: the statebus state server.
//!
//! One long-lived process owns the canonical key-value state and is its sole
//! mutator.  Clients talk to it over two loopback TCP channels:
//!
//! 1. Reply channel: request/reply, one request in flight per connection.
//! 2. Events channel: the hub publishes one change record per committed
//!    mutation to every connected subscriber.
//!
//! All requests funnel into a single core task and are processed strictly
//! serially, which makes every request atomic by construction.  For each
//! mutation the core diffs post-state against pre-state, bumps the revision,
//! publishes the change record, and only then sends the reply.

pub mod config;
pub mod core;
pub mod fanout;
pub mod registry;
pub mod reply;
pub mod server;

pub use config::{ConfigError, HubConfig};
pub use registry::{HandlerFault, HandlerRegistry, StateView};
pub use server::{Hub, HubError};
