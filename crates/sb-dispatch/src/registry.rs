//! Named task functions.
//!
//! A worker process registers the same functions under the same names as
//! the driver expects; a chunk assignment then only has to name one.
//! Unknown names and panics both become per-item faults; a worker never
//! dies on a bad task.

use sb_protocol::Kwargs;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A failure raised by (or on behalf of) one task invocation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TaskFault {
    pub message: String,
    pub detail: Option<Value>,
}

impl TaskFault {
    pub fn new(message: impl Into<String>) -> Self {
        TaskFault {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

type TaskFn = dyn Fn(&Value, &[Value], &Kwargs) -> Result<Value, TaskFault> + Send + Sync;

/// Registry of named task functions, shared by every worker in a process.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskFn>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            tasks: HashMap::new(),
        }
    }

    /// Register `task` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(&Value, &[Value], &Kwargs) -> Result<Value, TaskFault> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    /// Run one item through the named task, converting panics into faults.
    pub fn run(
        &self,
        name: &str,
        item: &Value,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value, TaskFault> {
        let Some(task) = self.tasks.get(name) else {
            return Err(TaskFault::new(format!("unknown task '{name}'")));
        };
        match catch_unwind(AssertUnwindSafe(|| task(item, args, kwargs))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskFault::new(format!(
                "task '{name}' panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
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
