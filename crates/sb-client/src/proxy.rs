//! The request/reply proxy.
//!
//! One TCP connection, one request in flight at a time.  Every operation is
//! a single round-trip; the correlation id on the reply is checked against
//! the request.  Proxies are deliberately `&mut self` throughout; each
//! concurrent task constructs its own.

use crate::discovery::Endpoints;
use crate::error::ClientError;
use sb_protocol::{
    FramedStream, Kwargs, Reply, ReplyBody, Request, RequestBody, StateMap, WireError, codec,
};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use uuid::Uuid;

/// Hub identity and current revision, as reported by a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubInfo {
    pub server_id: Uuid,
    pub revision: u64,
}

pub struct Proxy {
    framed: FramedStream,
    endpoints: Endpoints,
    request_timeout: Option<Duration>,
}

impl Proxy {
    /// Connect to a hub's reply channel.
    pub async fn connect(endpoints: &Endpoints) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(endpoints.reply_addr)
            .await
            .map_err(WireError::from)?;
        Ok(Proxy {
            framed: codec::framed(stream),
            endpoints: endpoints.clone(),
            request_timeout: None,
        })
    }

    /// Connect using the inherited environment for discovery.
    pub async fn connect_from_env() -> Result<Self, ClientError> {
        Self::connect(&Endpoints::from_env()?).await
    }

    /// Fail any request whose reply does not arrive within `limit`.
    /// Absence of a reply is a transport error: the hub is presumed gone.
    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = Some(limit);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Read one key.  `None` means the key is absent (a stored null comes
    /// back as `Some(Value::Null)`).
    pub async fn get(&mut self, key: &str) -> Result<Option<Value>, ClientError> {
        match self
            .round_trip(RequestBody::Get {
                key: key.to_owned(),
            })
            .await?
        {
            ReplyBody::Value { found, value } => Ok(found.then_some(value)),
            other => Err(unexpected_reply("value", &other)),
        }
    }

    /// Read the full state and the revision it was taken at.
    pub async fn snapshot(&mut self) -> Result<(StateMap, u64), ClientError> {
        match self.round_trip(RequestBody::Snapshot).await? {
            ReplyBody::Snapshot { entries, revision } => Ok((entries, revision)),
            other => Err(unexpected_reply("snapshot", &other)),
        }
    }

    /// Replace the value at `key`; returns the commit revision.
    pub async fn set(&mut self, key: &str, value: Value) -> Result<u64, ClientError> {
        let body = RequestBody::Set {
            key: key.to_owned(),
            value,
        };
        self.committed(body).await
    }

    /// Remove `key` if present; absent keys are a quiet no-op.
    pub async fn delete(&mut self, key: &str) -> Result<u64, ClientError> {
        self.committed(RequestBody::Delete {
            key: key.to_owned(),
            strict: false,
        })
        .await
    }

    /// Remove `key`, failing with [`ClientError::KeyMissing`] if absent.
    pub async fn delete_strict(&mut self, key: &str) -> Result<u64, ClientError> {
        self.committed(RequestBody::Delete {
            key: key.to_owned(),
            strict: true,
        })
        .await
    }

    /// Replace several keys in one commit (one revision, one change record).
    pub async fn update(&mut self, delta: StateMap) -> Result<u64, ClientError> {
        self.committed(RequestBody::Update { delta }).await
    }

    /// Run the named atomic handler on the hub; returns its value and the
    /// commit revision.
    pub async fn atomic(
        &mut self,
        handler: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<(Value, u64), ClientError> {
        let body = RequestBody::Atomic {
            handler: handler.to_owned(),
            args,
            kwargs,
        };
        match self.round_trip(body).await? {
            ReplyBody::AtomicDone { returned, revision } => Ok((returned, revision)),
            other => Err(unexpected_reply("atomic_done", &other)),
        }
    }

    pub async fn ping(&mut self) -> Result<HubInfo, ClientError> {
        match self.round_trip(RequestBody::Ping).await? {
            ReplyBody::Pong {
                server_id,
                revision,
            } => Ok(HubInfo {
                server_id,
                revision,
            }),
            other => Err(unexpected_reply("pong", &other)),
        }
    }

    /// Ask the hub to stop serving.
    pub async fn shutdown_hub(&mut self) -> Result<(), ClientError> {
        match self.round_trip(RequestBody::Shutdown).await? {
            ReplyBody::ShuttingDown => Ok(()),
            other => Err(unexpected_reply("shutting_down", &other)),
        }
    }

    async fn committed(&mut self, body: RequestBody) -> Result<u64, ClientError> {
        match self.round_trip(body).await? {
            ReplyBody::Committed { revision } => Ok(revision),
            other => Err(unexpected_reply("committed", &other)),
        }
    }

    async fn round_trip(&mut self, body: RequestBody) -> Result<ReplyBody, ClientError> {
        let id = Uuid::new_v4();
        codec::send_frame(&mut self.framed, &Request { id, body }).await?;

        let reply: Reply = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, codec::recv_frame(&mut self.framed))
                .await
                .map_err(|_| {
                    WireError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no reply within {limit:?}"),
                    ))
                })??,
            None => codec::recv_frame(&mut self.framed).await?,
        };

        if reply.id != id {
            return Err(ClientError::Protocol(format!(
                "correlation mismatch: sent {id}, got {}",
                reply.id
            )));
        }
        match reply.body {
            ReplyBody::Fault { fault } => Err(ClientError::from_fault(fault)),
            body => Ok(body),
        }
    }
}

fn unexpected_reply(expected: &str, got: &ReplyBody) -> ClientError {
    ClientError::Protocol(format!("expected {expected} reply, got {got:?}"))
}
