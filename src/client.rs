//! Client side of the service protocol.
//!
//! Used by collaborator processes, the `request-cli` binary and the
//! integration tests.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

use crate::config::ListenerConfig;
use crate::protocol::codec::{FrameError, FrameReader, FrameWriter};
use crate::protocol::messages::{ClientMessage, RequestId, ServiceEvent};
use crate::request::{ErrorKind, Headers};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("service closed the channel")]
    Closed,
}

/// Everything the service reported for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub status: Option<u16>,
    pub headers: Headers,
    pub body: Bytes,
    pub chunks: usize,
    pub failure: Option<(ErrorKind, String)>,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.status.is_some()
    }
}

/// One protocol channel to the service.
pub struct ServiceClient<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl ServiceClient<UnixStream> {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await.map_err(FrameError::Io)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite> ServiceClient<S> {
    pub fn new(stream: S) -> Self {
        let max = ListenerConfig::default().max_frame_bytes;
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, max),
            writer: FrameWriter::new(write_half, max),
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.writer.write(message).await?;
        Ok(())
    }

    /// Write bytes with no framing, for exercising the service's input checks.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_raw(bytes).await?;
        Ok(())
    }

    pub async fn start_request(
        &mut self,
        request_id: u64,
        method: &str,
        url: &str,
        headers: Headers,
        body: Option<Bytes>,
    ) -> Result<RequestId, ClientError> {
        let request_id = RequestId(request_id);
        self.send(&ClientMessage::StartRequest {
            request_id,
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body,
        })
        .await?;
        Ok(request_id)
    }

    pub async fn cancel_request(&mut self, request_id: RequestId) -> Result<(), ClientError> {
        self.send(&ClientMessage::CancelRequest { request_id }).await
    }

    pub async fn set_certificate_override(&mut self, paths: Vec<PathBuf>) -> Result<(), ClientError> {
        self.send(&ClientMessage::SetCertificateOverride { paths }).await
    }

    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Shutdown).await
    }

    /// Next event from the service, or `None` once it closed the channel.
    pub async fn next_event(&mut self) -> Result<Option<ServiceEvent>, ClientError> {
        Ok(self.reader.read().await?)
    }

    /// Read events until `request_id` reaches a terminal event.
    ///
    /// Events for other requests are discarded.
    pub async fn collect(&mut self, request_id: RequestId) -> Result<Exchange, ClientError> {
        let mut exchange = Exchange::default();
        let mut body = BytesMut::new();

        loop {
            let event = self.next_event().await?.ok_or(ClientError::Closed)?;
            if event.request_id() != request_id {
                tracing::trace!(request_id = %event.request_id(), "Skipping event for another request");
                continue;
            }
            match event {
                ServiceEvent::HeadersAvailable { status, headers, .. } => {
                    exchange.status = Some(status);
                    exchange.headers = headers;
                }
                ServiceEvent::DataChunk { bytes, .. } => {
                    exchange.chunks += 1;
                    body.extend_from_slice(&bytes);
                }
                ServiceEvent::RequestComplete { .. } => break,
                ServiceEvent::RequestFailed { error_kind, detail, .. } => {
                    exchange.failure = Some((error_kind, detail));
                    break;
                }
            }
        }

        exchange.body = body.freeze();
        Ok(exchange)
    }
}
