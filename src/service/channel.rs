//! Per-channel reader and writer tasks.
//!
//! The reader decodes frames and forwards them to the event loop; the writer
//! drains the session's event queue onto the wire. Neither touches service
//! state. Either one reports the channel closed when it gives up.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::protocol::codec::{FrameError, FrameReader, FrameWriter};
use crate::protocol::dispatcher::Inbound;
use crate::protocol::messages::ClientMessage;
use crate::session::{ClientSession, Outgoing, SessionId};

/// Any duplex byte stream a client can talk over.
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Split `stream` into reader and writer tasks and return the session that owns them.
pub fn open<S: ChannelIo>(stream: S, max_frame_bytes: usize, inbound: mpsc::Sender<Inbound>) -> ClientSession {
    let id = SessionId::new();
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(read_frames(id, FrameReader::new(read_half, max_frame_bytes), inbound.clone()));
    tokio::spawn(write_events(id, FrameWriter::new(write_half, max_frame_bytes), outbound_rx, inbound));

    ClientSession::new(id, outbound_tx, Some(reader.abort_handle()))
}

async fn read_frames<R>(id: SessionId, mut reader: FrameReader<R>, inbound: mpsc::Sender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let report = match reader.read::<ClientMessage>().await {
            Ok(Some(message)) => {
                tracing::trace!(session = %id, ?message, "Frame received");
                Inbound::Frame(id, message)
            }
            Ok(None) => Inbound::Closed(id),
            Err(e) if e.is_malformed() => Inbound::Malformed(id, e),
            Err(e) => {
                tracing::debug!(session = %id, error = %e, "Channel read failed");
                Inbound::Closed(id)
            }
        };

        let last = !matches!(report, Inbound::Frame(..));
        if inbound.send(report).await.is_err() || last {
            return;
        }
    }
}

async fn write_events<W>(
    id: SessionId,
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::Sender<Inbound>,
) where
    W: AsyncWrite + Unpin,
{
    // A chunk's credit is returned when `outgoing` drops after the write.
    while let Some(outgoing) = outbound.recv().await {
        if let Err(e) = writer.write(&outgoing.event).await {
            let request_id = outgoing.event.request_id();
            match e {
                FrameError::Io(_) => tracing::debug!(session = %id, %request_id, error = %e, "Channel write failed"),
                _ => tracing::warn!(session = %id, %request_id, error = %e, "Event does not fit a frame, closing channel"),
            }
            let _ = inbound.send(Inbound::Closed(id)).await;
            return;
        }
    }
    // Session dropped: everything queued has been written.
    if let Err(e) = writer.shutdown().await {
        tracing::trace!(session = %id, error = %e, "Channel shutdown failed");
    }
}
