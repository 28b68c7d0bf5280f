//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. A zero length, a length over the limit, or a body that does not
//! decode is malformed.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("channel i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("zero-length frame")]
    Empty,

    #[error("frame does not decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message does not encode: {0}")]
    Encode(#[source] serde_json::Error),
}

impl FrameError {
    /// The peer sent bytes that violate the protocol, as opposed to the
    /// channel itself failing.
    pub fn is_malformed(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. } | FrameError::Empty | FrameError::Decode(_))
    }
}

/// Serialize `message` into one complete frame.
pub fn encode_frame<T: Serialize>(message: &T, max: usize) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message).map_err(FrameError::Encode)?;
    if payload.len() > max || payload.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge { len: payload.len(), max });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads frames from one side of a channel.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self { inner, max_frame_bytes }
    }

    /// Read the next message. Returns `None` when the peer closed the channel
    /// between frames.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        let first = self.inner.read(&mut prefix).await?;
        if first == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut prefix[first..]).await?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > self.max_frame_bytes {
            return Err(FrameError::TooLarge { len, max: self.max_frame_bytes });
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        serde_json::from_slice(&payload).map(Some).map_err(FrameError::Decode)
    }
}

/// Writes frames to one side of a channel.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_frame_bytes: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_bytes: usize) -> Self {
        Self { inner, max_frame_bytes }
    }

    pub async fn write<T: Serialize>(&mut self, message: &T) -> Result<(), FrameError> {
        let frame = encode_frame(message, self.max_frame_bytes)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write raw bytes with no framing.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ClientMessage, RequestId};

    const MAX: usize = 64 * 1024;

    #[tokio::test]
    async fn frames_cross_a_pipe_in_order() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(a, MAX);
        let mut reader = FrameReader::new(b, MAX);

        writer.write(&ClientMessage::CancelRequest { request_id: RequestId(4) }).await.unwrap();
        writer.write(&ClientMessage::Shutdown).await.unwrap();
        drop(writer);

        assert_eq!(
            reader.read::<ClientMessage>().await.unwrap(),
            Some(ClientMessage::CancelRequest { request_id: RequestId(4) })
        );
        assert_eq!(reader.read::<ClientMessage>().await.unwrap(), Some(ClientMessage::Shutdown));
        assert_eq!(reader.read::<ClientMessage>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_malformed() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, 16);
        a.write_all(&1000u32.to_be_bytes()).await.unwrap();

        let err = reader.read::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 1000, max: 16 }));
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn empty_frame_is_malformed() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, MAX);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();

        assert!(matches!(reader.read::<ClientMessage>().await, Err(FrameError::Empty)));
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, MAX);
        a.write_all(&5u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{nope").await.unwrap();

        let err = reader.read::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, MAX);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);

        let err = reader.read::<ClientMessage>().await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(!err.is_malformed());
    }

    #[test]
    fn encode_respects_limit() {
        let message = ClientMessage::SetCertificateOverride { paths: vec!["/a/very/long/path.pem".into()] };
        assert!(matches!(encode_frame(&message, 8), Err(FrameError::TooLarge { .. })));

        let frame = encode_frame(&ClientMessage::Shutdown, MAX).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
    }
}
