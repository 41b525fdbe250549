//! The dispatch driver.
//!
//! `process_map` writes all chunk assignments in one commit, spawns the
//! workers, and returns a [`ResultStream`].  The stream consumes result
//! keys as the hub's change notifications deliver them, buffers chunks that
//! arrive out of order, and yields one item at a time in input order.

use crate::plan::{self, ChunkResult, ChunkSpec, TaskOutcome};
use crate::registry::TaskRegistry;
use crate::worker::run_worker;
use sb_client::{ClientError, Endpoints, Proxy, Subscription};
use sb_protocol::{Kwargs, StateMap, SubscribeFilter, WireError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tuning for one `process_map` call.
#[derive(Default)]
pub struct MapOptions {
    /// Worker count; defaults to the host's available parallelism.
    pub workers: Option<usize>,
    /// Common positional arguments passed to every task invocation.
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
    /// Per-wait deadline while the stream is blocked on the next chunk.
    pub result_timeout: Option<Duration>,
}

/// One failed task, delivered at the input position it would have filled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("task at position {index}: {message}")]
pub struct TaskFailure {
    pub index: usize,
    pub message: String,
    pub detail: Option<Value>,
}

/// What one position of the output stream can fail with.
#[derive(Debug, thiserror::Error)]
pub enum MapItemError {
    #[error(transparent)]
    Task(#[from] TaskFailure),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Fan `items` across a worker pool and return the in-order result stream.
///
/// The result subscription opens before the assignments are written, so no
/// result notification can be missed.  Assignments go out in a single
/// commit, so workers wake on one revision.
pub async fn process_map(
    endpoints: &Endpoints,
    registry: Arc<TaskRegistry>,
    handler: &str,
    items: Vec<Value>,
    opts: MapOptions,
) -> Result<ResultStream, ClientError> {
    let task_id = Uuid::new_v4();
    let total = items.len();
    let workers = opts.workers.unwrap_or_else(default_workers).max(1);
    let bounds = plan::chunk_bounds(total, workers);

    let mut control = Proxy::connect(endpoints).await?;
    let subscription = Subscription::open(
        endpoints,
        SubscribeFilter::prefix(plan::result_prefix(task_id)),
    )
    .await?;

    let mut delta = StateMap::new();
    for (worker, range) in bounds.iter().enumerate() {
        let spec = ChunkSpec {
            handler: handler.to_owned(),
            start: range.start,
            items: items[range.clone()].to_vec(),
            args: opts.args.clone(),
            kwargs: opts.kwargs.clone(),
        };
        delta.insert(
            plan::chunk_key(task_id, worker),
            serde_json::to_value(&spec).map_err(WireError::from)?,
        );
    }
    if !delta.is_empty() {
        control.update(delta).await?;
    }
    debug!(%task_id, total, chunks = bounds.len(), "dispatch assigned");

    for worker in 0..bounds.len() {
        let endpoints = endpoints.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = run_worker(endpoints, registry, task_id, worker).await {
                warn!(%task_id, worker, error = %e, "worker failed");
            }
        });
    }

    Ok(ResultStream {
        control,
        subscription,
        task_id,
        result_prefix: plan::result_prefix(task_id),
        chunks: bounds.len(),
        total,
        next_index: 0,
        ready: HashMap::new(),
        result_timeout: opts.result_timeout,
        cancelled: false,
        cleaned: false,
    })
}

/// Lazy, in-input-order view of one dispatch's results.
pub struct ResultStream {
    control: Proxy,
    subscription: Subscription,
    task_id: Uuid,
    result_prefix: String,
    chunks: usize,
    total: usize,
    next_index: usize,
    ready: HashMap<usize, TaskOutcome>,
    result_timeout: Option<Duration>,
    cancelled: bool,
    cleaned: bool,
}

impl ResultStream {
    /// Number of input items this dispatch covers.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The next result in input order.
    ///
    /// Blocks until the chunk containing the next index has arrived.  A
    /// failed task yields `Err(MapItemError::Task(_))` at its position and
    /// the stream continues past it; a transport failure ends the stream.
    pub async fn next(&mut self) -> Option<Result<Value, MapItemError>> {
        if self.next_index >= self.total {
            if !self.cleaned {
                self.cleaned = true;
                self.cleanup().await;
            }
            return None;
        }
        loop {
            if let Some(outcome) = self.ready.remove(&self.next_index) {
                let index = self.next_index;
                self.next_index += 1;
                return Some(match outcome {
                    TaskOutcome::Ok { value } => Ok(value),
                    TaskOutcome::Err { message, detail } => Err(MapItemError::Task(TaskFailure {
                        index,
                        message,
                        detail,
                    })),
                });
            }
            if let Err(e) = self.pump().await {
                self.next_index = self.total;
                return Some(Err(MapItemError::Client(e)));
            }
        }
    }

    /// Drain the stream, failing fast on the first bad item.
    pub async fn collect(mut self) -> Result<Vec<Value>, MapItemError> {
        let mut values = Vec::with_capacity(self.total);
        while let Some(item) = self.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    /// Signal workers to abandon chunks they have not started.
    ///
    /// Chunks already computing run to completion and are ignored here;
    /// workers check the flag at chunk boundaries only.
    pub async fn cancel(&mut self) -> Result<(), ClientError> {
        if self.cancelled {
            return Ok(());
        }
        self.control
            .set(&plan::cancel_key(self.task_id), Value::Bool(true))
            .await?;
        self.cancelled = true;
        Ok(())
    }

    /// Wait for one change notification and fold new result chunks in.
    async fn pump(&mut self) -> Result<(), ClientError> {
        let event = match self.result_timeout {
            Some(limit) => tokio::time::timeout(limit, self.subscription.next_event())
                .await
                .map_err(|_| ClientError::Timeout)??,
            None => self.subscription.next_event().await?,
        };
        for (key, change) in &event.changes {
            if !key.starts_with(&self.result_prefix) || !change.exists_after {
                continue;
            }
            let chunk: ChunkResult = serde_json::from_value(change.after.clone())
                .map_err(|e| ClientError::Protocol(format!("bad result chunk at {key}: {e}")))?;
            for (offset, outcome) in chunk.entries.into_iter().enumerate() {
                self.ready.insert(chunk.start + offset, outcome);
            }
        }
        Ok(())
    }

    /// Best-effort removal of this dispatch's bookkeeping keys.
    async fn cleanup(&mut self) {
        for worker in 0..self.chunks {
            let _ = self
                .control
                .delete(&plan::chunk_key(self.task_id, worker))
                .await;
            let _ = self
                .control
                .delete(&plan::result_key(self.task_id, worker))
                .await;
        }
        let _ = self.control.delete(&plan::cancel_key(self.task_id)).await;
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
