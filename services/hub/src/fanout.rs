//! Change-record fan-out.
//!
//! Each subscriber connection gets a `broadcast::Receiver` cloned off the
//! core's publish channel at accept time, then sends one `SubscribeFilter`
//! frame.  From then on every change record matching the filter is forwarded
//! in revision order.
//!
//! Prefix filtering here is best-effort bandwidth saving; subscribers
//! re-filter in-process.  A subscriber that falls behind the broadcast
//! channel is disconnected rather than silently skipped ahead: a visible
//! connection loss instead of a watcher stalled on a missed record.

use sb_protocol::{ChangeEvent, SubscribeAck, SubscribeFilter, codec};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Accept loop.  Runs until the listener fails or the task is aborted.
pub async fn run_event_fanout(listener: TcpListener, events_tx: broadcast::Sender<ChangeEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "subscriber connected");
                // Subscribe before the handshake so no record committed
                // after the accept can be missed.
                let events_rx = events_tx.subscribe();
                tokio::spawn(serve_subscriber(stream, events_rx));
            }
            Err(e) => {
                warn!(error = %e, "events accept failed");
                break;
            }
        }
    }
}

async fn serve_subscriber(stream: TcpStream, mut events_rx: broadcast::Receiver<ChangeEvent>) {
    let mut framed = codec::framed(stream);

    let filter: SubscribeFilter = match codec::recv_frame(&mut framed).await {
        Ok(filter) => filter,
        Err(e) => {
            debug!(error = %e, "subscriber closed before sending a filter");
            return;
        }
    };
    if codec::send_frame(&mut framed, &SubscribeAck {}).await.is_err() {
        return;
    }

    loop {
        match events_rx.recv().await {
            Ok(event) => {
                if !event.changes.keys().any(|key| filter.matches(key)) {
                    continue;
                }
                if codec::send_frame(&mut framed, &event).await.is_err() {
                    debug!("subscriber gone; closing");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "subscriber lagged behind the publish channel; disconnecting");
                break;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
