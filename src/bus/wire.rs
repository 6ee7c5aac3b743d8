//! Two-part length-delimited framing shared by the broker and the bus client.
//!
//! Each bus message is two `tokio_util` length-delimited frames back to back:
//! frame 1 is the UTF-8 topic, frame 2 is the serialized [`MessageEnvelope`].
//! This matches the wire format section of the project spec exactly:
//! `[u32 topic_len][topic_bytes][u32 envelope_len][envelope_bytes]`.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{Error, Result};

use super::envelope::MessageEnvelope;

pub struct WireFrame {
    pub topic: String,
    pub envelope: MessageEnvelope,
}

/// Reads one two-part frame from a length-delimited-framed stream.
/// Returns `Ok(None)` on clean EOF between messages.
pub async fn read_frame<S>(framed: &mut Framed<S, LengthDelimitedCodec>) -> Result<Option<WireFrame>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let topic_bytes = match framed.next().await {
        Some(b) => b.map_err(|e| Error::Io(e))?,
        None => return Ok(None),
    };
    let envelope_bytes = match framed.next().await {
        Some(b) => b.map_err(|e| Error::Io(e))?,
        None => return Ok(None),
    };
    let topic = String::from_utf8(topic_bytes.to_vec())
        .map_err(|e| Error::Internal(format!("non-utf8 topic frame: {e}")))?;
    let envelope: MessageEnvelope = serde_json::from_slice(&envelope_bytes)?;
    Ok(Some(WireFrame { topic, envelope }))
}

/// Writes one two-part frame (topic, then envelope) to a framed stream.
pub async fn write_frame<S>(
    framed: &mut Framed<S, LengthDelimitedCodec>,
    topic: &str,
    envelope: &MessageEnvelope,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let envelope_bytes = serde_json::to_vec(envelope)?;
    framed
        .send(Bytes::copy_from_slice(topic.as_bytes()))
        .await
        .map_err(Error::Io)?;
    framed
        .send(Bytes::from(envelope_bytes))
        .await
        .map_err(Error::Io)?;
    Ok(())
}

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::new()
}
