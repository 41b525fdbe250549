//! Events-channel subscription.
//!
//! Handshake: send one `SubscribeFilter`, read one `SubscribeAck`.  Once the
//! ack is in, any change record the hub commits after the subscriber's next
//! reply-channel round-trip is guaranteed to arrive here (the hub attaches
//! the subscriber to the publish channel before acking).

use crate::discovery::Endpoints;
use crate::error::ClientError;
use sb_protocol::{ChangeEvent, FramedStream, SubscribeAck, SubscribeFilter, WireError, codec};
use tokio::net::TcpStream;
use tracing::debug;

pub struct Subscription {
    framed: FramedStream,
    last_revision: Option<u64>,
}

impl Subscription {
    /// Open an events connection with the given transport-level filter.
    pub async fn open(
        endpoints: &Endpoints,
        filter: SubscribeFilter,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(endpoints.events_addr)
            .await
            .map_err(WireError::from)?;
        let mut framed = codec::framed(stream);
        codec::send_frame(&mut framed, &filter).await?;
        let SubscribeAck {} = codec::recv_frame(&mut framed).await?;
        debug!(prefixes = ?filter.prefixes, "subscription open");
        Ok(Subscription {
            framed,
            last_revision: None,
        })
    }

    /// The next change record, in strictly increasing revision order.
    ///
    /// A revision that fails to increase means the hub and this connection
    /// disagree about history, surfaced as a protocol error.
    pub async fn next_event(&mut self) -> Result<ChangeEvent, ClientError> {
        let event: ChangeEvent = codec::recv_frame(&mut self.framed).await?;
        if let Some(last) = self.last_revision {
            if event.revision <= last {
                return Err(ClientError::Protocol(format!(
                    "revision regression: {} after {}",
                    event.revision, last
                )));
            }
        }
        self.last_revision = Some(event.revision);
        Ok(event)
    }
}
