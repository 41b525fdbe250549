//! Chunk planning and the state-key layout of one dispatch.
//!
//! Indices are partitioned into contiguous chunks of size ⌈total/N⌉, so
//! each worker's output is a contiguous run and reassembly is a merge by
//! starting index.  All keys of one dispatch live under a dedicated prefix,
//! which lets the driver's subscription filter at the transport level.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sb_protocol::Kwargs;
use std::ops::Range;
use uuid::Uuid;

/// Prefix reserved for dispatch bookkeeping inside the shared state.
pub const TASK_KEY_PREFIX: &str = "__statebus_task__/";

/// One worker's assignment: which indices it owns and what to run on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Name of the registered task function.
    pub handler: String,
    /// Input index of the first item in `items`.
    pub start: usize,
    pub items: Vec<Value>,
    /// Common positional arguments, shared by every item.
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// One worker's completed chunk, in item order starting at `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub start: usize,
    pub entries: Vec<TaskOutcome>,
}

/// Result of one task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Ok {
        value: Value,
    },
    Err {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
}

/// Contiguous index ranges for `total` items over at most `workers` chunks.
/// Every index appears exactly once; empty ranges are never produced.
pub fn chunk_bounds(total: usize, workers: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return Vec::new();
    }
    let chunk = total.div_ceil(workers.max(1));
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk).min(total);
        bounds.push(start..end);
        start = end;
    }
    bounds
}

pub fn chunk_key(task_id: Uuid, worker: usize) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}/chunk/{worker}")
}

pub fn result_key(task_id: Uuid, worker: usize) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}/result/{worker}")
}

/// Prefix shared by every result key of one dispatch.
pub fn result_prefix(task_id: Uuid) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}/result/")
}

pub fn cancel_key(task_id: Uuid) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}/cancel")
}
