//! Client-facing error taxonomy.

use sb_protocol::{Fault, WireError, fault_codes};
use serde_json::Value;

/// Everything a proxy or watcher operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the hub, connection lost, malformed frame, or no
    /// reply within the configured request timeout.
    #[error("transport: {0}")]
    Transport(#[from] WireError),
    /// A watcher exceeded its deadline.
    #[error("watch timed out")]
    Timeout,
    /// No hub endpoints available to this process.
    #[error("hub endpoints not configured: {0}")]
    NotConfigured(String),
    /// Strict get/delete on an absent key.
    #[error("key missing: {0}")]
    KeyMissing(String),
    /// An atomic handler or dispatched task failed; `detail` is the opaque
    /// payload it attached.
    #[error("handler fault: {message}")]
    User {
        message: String,
        detail: Option<Value>,
    },
    /// The hub and this client disagree about the protocol: revision
    /// regression, correlation mismatch, unknown handler, unexpected reply.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Map a wire fault onto the client taxonomy.
    pub(crate) fn from_fault(fault: Fault) -> Self {
        match fault.code.as_str() {
            fault_codes::KEY_MISSING => ClientError::KeyMissing(fault.message),
            fault_codes::USER_ERROR => ClientError::User {
                message: fault.message,
                detail: fault.detail,
            },
            _ => ClientError::Protocol(format!("{}: {}", fault.code, fault.message)),
        }
    }
}
