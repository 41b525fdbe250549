//! The worker side of a dispatch.
//!
//! `run_worker` is the entrypoint whatever supervises workers calls: the
//! driver runs it on local tasks, an external supervisor would run it in a
//! spawned process after injecting the discovery variables.  Each call
//! constructs its own proxy.

use crate::plan::{self, ChunkResult, ChunkSpec, TaskOutcome};
use crate::registry::TaskRegistry;
use sb_client::{ClientError, Endpoints, Proxy, WatchOptions};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("state client: {0}")]
    Client(#[from] ClientError),
    #[error("chunk payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Pull this worker's chunk assignment, run it, write the result chunk.
///
/// The cancel flag is polled once at the chunk boundary: a dispatch
/// cancelled before the chunk starts computes nothing.
pub async fn run_worker(
    endpoints: Endpoints,
    registry: Arc<TaskRegistry>,
    task_id: Uuid,
    worker_id: usize,
) -> Result<(), WorkerError> {
    let mut proxy = Proxy::connect(&endpoints).await?;

    // The assignment is usually written before the worker starts; watch
    // including the current state so either order works.
    let raw = proxy
        .get_when_available(
            &plan::chunk_key(task_id, worker_id),
            WatchOptions::including_current(),
        )
        .await?;
    let chunk: ChunkSpec = serde_json::from_value(raw)?;

    if is_cancelled(&mut proxy, task_id).await? {
        debug!(%task_id, worker_id, "dispatch cancelled before chunk start");
        return Ok(());
    }

    let mut entries = Vec::with_capacity(chunk.items.len());
    for item in &chunk.items {
        let outcome = match registry.run(&chunk.handler, item, &chunk.args, &chunk.kwargs) {
            Ok(value) => TaskOutcome::Ok { value },
            Err(fault) => TaskOutcome::Err {
                message: fault.message,
                detail: fault.detail,
            },
        };
        entries.push(outcome);
    }
    debug!(%task_id, worker_id, items = entries.len(), "chunk complete");

    let result = ChunkResult {
        start: chunk.start,
        entries,
    };
    proxy
        .set(
            &plan::result_key(task_id, worker_id),
            serde_json::to_value(&result)?,
        )
        .await?;
    Ok(())
}

async fn is_cancelled(proxy: &mut Proxy, task_id: Uuid) -> Result<bool, ClientError> {
    Ok(proxy
        .get(&plan::cancel_key(task_id))
        .await?
        .is_some_and(|flag| flag == Value::Bool(true)))
}
