//! Hub assembly: bind both listeners, spawn the core and the two accept
//! loops, expose the endpoints.

use crate::config::HubConfig;
use crate::core::{Core, CoreRequest};
use crate::registry::HandlerRegistry;
use crate::{fanout, reply};
use sb_protocol::{EVENTS_ADDR_ENV, REPLY_ADDR_ENV, Request, RequestBody};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Depth of the core inbox.  Backpressure, not correctness: requests queue
/// here only while the core is busy with an earlier one.
const INBOX_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// A running hub.
///
/// Dropping it abandons the background tasks; call [`Hub::shutdown`] for an
/// orderly stop, or [`Hub::closed`] to wait for a client-requested one.
pub struct Hub {
    reply_addr: SocketAddr,
    events_addr: SocketAddr,
    server_id: Uuid,
    inbox: mpsc::Sender<CoreRequest>,
    core_task: JoinHandle<()>,
    reply_task: JoinHandle<()>,
    fanout_task: JoinHandle<()>,
}

impl Hub {
    /// Bind both channels and start serving.
    ///
    /// `handlers` is the frozen set of named atomic handlers this hub will
    /// execute; register them all before calling this.
    pub async fn start(config: HubConfig, handlers: HandlerRegistry) -> Result<Self, HubError> {
        let reply_listener = bind(&config.reply_bind).await?;
        let events_listener = bind(&config.events_bind).await?;
        let reply_addr = local_addr(&reply_listener, &config.reply_bind)?;
        let events_addr = local_addr(&events_listener, &config.events_bind)?;

        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);

        let core = Core::new(Arc::new(handlers), events_tx.clone());
        let server_id = core.server_id();
        info!(%reply_addr, %events_addr, %server_id, "hub listening");

        let core_task = tokio::spawn(core.run(inbox_rx));
        let reply_task = tokio::spawn(reply::run_reply_listener(reply_listener, inbox_tx.clone()));
        let fanout_task = tokio::spawn(fanout::run_event_fanout(events_listener, events_tx));

        Ok(Hub {
            reply_addr,
            events_addr,
            server_id,
            inbox: inbox_tx,
            core_task,
            reply_task,
            fanout_task,
        })
    }

    pub fn reply_addr(&self) -> SocketAddr {
        self.reply_addr
    }

    pub fn events_addr(&self) -> SocketAddr {
        self.events_addr
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    /// The discovery variables a supervisor injects into spawned workers
    /// (e.g. via `Command::envs`).
    pub fn env_pairs(&self) -> [(&'static str, String); 2] {
        [
            (REPLY_ADDR_ENV, self.reply_addr.to_string()),
            (EVENTS_ADDR_ENV, self.events_addr.to_string()),
        ]
    }

    /// Wait until a client-requested shutdown stops the core, then stop the
    /// listeners.
    pub async fn closed(&mut self) {
        let _ = (&mut self.core_task).await;
        self.reply_task.abort();
        self.fanout_task.abort();
    }

    /// Orderly local shutdown: stop the core as if a shutdown request had
    /// arrived, then stop the listeners.
    pub async fn shutdown(self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            id: Uuid::new_v4(),
            body: RequestBody::Shutdown,
        };
        if self
            .inbox
            .send(CoreRequest {
                request,
                reply: reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        self.reply_task.abort();
        self.fanout_task.abort();
        let _ = self.core_task.await;
        info!("hub stopped");
    }
}

async fn bind(addr: &str) -> Result<TcpListener, HubError> {
    TcpListener::bind(addr).await.map_err(|source| HubError::Bind {
        addr: addr.to_owned(),
        source,
    })
}

fn local_addr(listener: &TcpListener, addr: &str) -> Result<SocketAddr, HubError> {
    listener.local_addr().map_err(|source| HubError::Bind {
        addr: addr.to_owned(),
        source,
    })
}
