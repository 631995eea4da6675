//! Tunnel connection handle
//!
//! A `TunnelConnection` is what the registry hands out: a cheap handle that
//! queues frames for the connection's writer task and waits for the write to
//! land on the socket.

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace, warn};
use tunnelgate_proto::{TunnelCodec, TunnelMessage};

use crate::transport::{Frame, TransportError, TransportResult};

/// Frames waiting for the writer task
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// How long the writer waits for the socket to close once it stops
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct OutboundFrame {
    frame: Frame,
    ack: oneshot::Sender<TransportResult<()>>,
}

/// Receiving half of a connection's outbound queue, drained by the writer task
pub struct OutboundQueue {
    rx: mpsc::Receiver<OutboundFrame>,
}

/// Represents an active tunnel connection
pub struct TunnelConnection {
    connection_id: String,
    peer_id: String,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    frame_tx: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("connection_id", &self.connection_id)
            .field("peer_id", &self.peer_id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TunnelConnection {
    /// Create a connection handle and the queue its writer task will drain
    pub fn new(peer_id: impl Into<String>, remote_addr: Option<SocketAddr>) -> (Self, OutboundQueue) {
        let (frame_tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let connection = Self {
            connection_id: format!("ws-{}", uuid::Uuid::new_v4()),
            peer_id: peer_id.into(),
            remote_addr,
            connected_at: Utc::now(),
            frame_tx,
            shutdown: CancellationToken::new(),
        };

        (connection, OutboundQueue { rx })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Encode and write a message, returning once the socket accepted it
    pub async fn send_message(&self, message: &TunnelMessage) -> TransportResult<()> {
        let text = TunnelCodec::encode(message)?;
        self.send_frame(Frame::Text(text)).await
    }

    /// Write a raw frame, returning once the socket accepted it
    pub async fn send_frame(&self, frame: Frame) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let (ack, ack_rx) = oneshot::channel();
        self.frame_tx
            .send(OutboundFrame { frame, ack })
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        // The writer drops the ack without answering when it shuts down first
        ack_rx.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    /// Ask the owning session to shut down. Idempotent.
    pub fn close(&self, reason: &str) {
        if !self.shutdown.is_cancelled() {
            debug!(
                peer_id = %self.peer_id,
                connection_id = %self.connection_id,
                reason = %reason,
                "Closing tunnel connection"
            );
            self.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection has been closed
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Writer task: drains the outbound queue into the socket sink.
///
/// Stops on shutdown, even mid-write, or on the first failed write; a failed
/// write also closes the connection so the read side ends too, and is
/// returned so the session can report it.
pub(crate) async fn drive_writer<S>(
    mut sink: S,
    mut queue: OutboundQueue,
    shutdown: CancellationToken,
    connection_id: String,
) -> TransportResult<()>
where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.rx.recv() => {
                let Some(OutboundFrame { frame, ack }) = next else {
                    break;
                };

                let written = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("[{}] Write abandoned on shutdown", connection_id);
                        break;
                    }
                    written = sink.send(frame) => written,
                };

                match written {
                    Ok(()) => {
                        trace!("[{}] Frame written", connection_id);
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        warn!("[{}] Tunnel write failed: {}", connection_id, e);
                        outcome = Err(TransportError::WebSocket(e.to_string()));
                        let _ = ack.send(Err(e));
                        shutdown.cancel();
                        break;
                    }
                }
            }
        }
    }

    // Anything still queued is answered with ConnectionClosed via the dropped acks
    queue.rx.close();
    while queue.rx.try_recv().is_ok() {}

    match tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[{}] Error closing tunnel sink: {}", connection_id, e),
        Err(_) => debug!("[{}] Tunnel sink did not close in time", connection_id),
    }
    debug!("[{}] Tunnel writer task ended", connection_id);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;
    use tunnelgate_proto::ReplyEnvelope;

    fn spawn_writer(
        connection: &TunnelConnection,
        queue: OutboundQueue,
    ) -> (
        fmpsc::UnboundedReceiver<Frame>,
        tokio::task::JoinHandle<TransportResult<()>>,
    ) {
        let (tx, rx) = fmpsc::unbounded::<Frame>();
        let sink = tx.sink_map_err(|_| TransportError::ConnectionClosed);
        let handle = tokio::spawn(drive_writer(
            sink,
            queue,
            connection.shutdown_token(),
            connection.connection_id().to_string(),
        ));
        (rx, handle)
    }

    #[tokio::test]
    async fn test_send_message_reaches_sink() {
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        let (mut frames, _writer) = spawn_writer(&connection, queue);

        let reply = TunnelMessage::Reply(ReplyEnvelope::new("r1", "ok"));
        connection.send_message(&reply).await.unwrap();

        match frames.next().await {
            Some(Frame::Text(text)) => {
                assert_eq!(TunnelCodec::decode(&text).unwrap(), reply);
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        let (_frames, writer) = spawn_writer(&connection, queue);

        connection.close("test");
        assert!(connection.is_closed());
        assert!(writer.await.unwrap().is_ok());

        let result = connection.send_frame(Frame::Text("{}".to_string())).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        let (frames, writer) = spawn_writer(&connection, queue);

        // Receiver gone: every write fails
        drop(frames);

        let result = connection.send_frame(Frame::Text("{}".to_string())).await;
        assert!(result.is_err());

        assert!(writer.await.unwrap().is_err());
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stuck_write() {
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        let writer = tokio::spawn(drive_writer(
            crate::transport::testing::StuckSink,
            queue,
            connection.shutdown_token(),
            connection.connection_id().to_string(),
        ));

        let send = connection.send_frame(Frame::Text("{}".to_string()));
        tokio::pin!(send);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut send)
                .await
                .is_err(),
            "write should still be pending"
        );

        connection.close("shutdown");

        let result = tokio::time::timeout(Duration::from_secs(3), writer)
            .await
            .expect("writer should stop on shutdown")
            .unwrap();
        assert!(result.is_ok());
        assert!(matches!(
            send.await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_without_writer_fails() {
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        drop(queue);

        let result = connection.send_frame(Frame::Ping(vec![])).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _qa) = TunnelConnection::new("agent-1", None);
        let (b, _qb) = TunnelConnection::new("agent-1", None);
        assert_ne!(a.connection_id(), b.connection_id());
        assert!(a.connection_id().starts_with("ws-"));
    }
}
