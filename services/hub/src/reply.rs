//! Reply-channel listener.
//!
//! One connection per client proxy, one request in flight per connection.
//! Connection tasks only frame and decode; every decoded request is handed
//! to the core task and its reply awaited over a oneshot.
//!
//! A malformed frame drops that connection only; a client fault never
//! takes the hub down.

use crate::core::CoreRequest;
use sb_protocol::{Request, WireError, codec};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Accept loop.  Runs until the listener fails or the task is aborted.
pub async fn run_reply_listener(listener: TcpListener, inbox: mpsc::Sender<CoreRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "reply connection opened");
                tokio::spawn(serve_connection(stream, inbox.clone()));
            }
            Err(e) => {
                warn!(error = %e, "reply accept failed");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, inbox: mpsc::Sender<CoreRequest>) {
    let mut framed = codec::framed(stream);
    loop {
        let request: Request = match codec::recv_frame(&mut framed).await {
            Ok(request) => request,
            Err(WireError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "dropping reply connection on malformed frame");
                break;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let core_request = CoreRequest {
            request,
            reply: reply_tx,
        };
        // A closed inbox means the core has shut down; nothing left to serve.
        if inbox.send(core_request).await.is_err() {
            break;
        }
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => break,
        };
        if let Err(e) = codec::send_frame(&mut framed, &reply).await {
            debug!(error = %e, "reply write failed; client gone");
            break;
        }
    }
}
