//! Length-prefixed JSON framing shared by the hub and its clients.
//!
//! Every frame is a 4-byte big-endian length followed by one JSON document.
//! Both channels use the same framing; the payload type differs per channel
//! and direction.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Hard cap on a single frame.  A full-state snapshot must fit.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A framed loopback connection.
pub type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Errors crossing the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Wrap a fresh TCP stream in the shared framing.
pub fn framed(stream: TcpStream) -> FramedStream {
    Framed::new(stream, frame_codec())
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, WireError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, WireError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Send one message as one frame.
pub async fn send_frame<T: Serialize>(framed: &mut FramedStream, msg: &T) -> Result<(), WireError> {
    framed.send(encode(msg)?).await?;
    Ok(())
}

/// Receive the next frame and decode it.  A cleanly closed peer is
/// `WireError::Closed`, not an IO error.
pub async fn recv_frame<T: DeserializeOwned>(framed: &mut FramedStream) -> Result<T, WireError> {
    match framed.next().await {
        Some(Ok(frame)) => decode(&frame),
        Some(Err(e)) => Err(WireError::Io(e)),
        None => Err(WireError::Closed),
    }
}
