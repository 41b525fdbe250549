//! sb-dispatch: map a sequence of work items across a pool of workers that
//! share a statebus hub.
//!
//! The driver partitions the input into contiguous chunks, writes one chunk
//! assignment per worker into the state, and watches for result keys.
//! Workers pull their assignment, run the named task function over each
//! item, and write an ordered result chunk back.  The driver yields results
//! lazily in input order, buffering out-of-order chunks; a failed item
//! surfaces at the position it would have occupied.
//!
//! Task functions, like atomic handlers, are registered by name; the state
//! carries names and serialized arguments, never code.

pub mod driver;
pub mod plan;
pub mod registry;
pub mod worker;

pub use driver::{MapItemError, MapOptions, ResultStream, TaskFailure, process_map};
pub use registry::{TaskFault, TaskRegistry};
pub use worker::{WorkerError, run_worker};
