//! Gateway-side tunnel handler
//!
//! Ties the registry, the correlation store and the session loop together:
//! accepted tunnels become sessions, and inbound calls are forwarded to the
//! peer's tunnel and answered from the correlation store.

use futures::{Sink, Stream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tunnelgate_proto::{RequestData, RequestEnvelope, TunnelMessage, DEFAULT_REPLY_TIMEOUT};

use crate::connection::TunnelConnection;
use crate::correlation::CorrelationStore;
use crate::error::GatewayError;
use crate::registry::ConnectionRegistry;
use crate::session::Session;
use crate::transport::{Frame, TransportError};

/// Handles tunnel sessions and tunneled calls for the gateway
#[derive(Clone)]
pub struct TunnelHandler {
    registry: ConnectionRegistry,
    store: CorrelationStore,
    reply_timeout: Duration,
}

impl TunnelHandler {
    pub fn new(registry: ConnectionRegistry, store: CorrelationStore) -> Self {
        Self {
            registry,
            store,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn correlation_store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Run a session for a freshly accepted tunnel until it ends
    pub async fn handle_connection<R, W>(
        &self,
        peer_id: String,
        remote_addr: Option<SocketAddr>,
        inbound: R,
        outbound: W,
    ) where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin + Send,
        W: Sink<Frame, Error = TransportError> + Unpin + Send + 'static,
    {
        let (connection, queue) = TunnelConnection::new(peer_id, remote_addr);
        let connection = Arc::new(connection);

        info!(
            peer_id = %connection.peer_id(),
            remote_addr = ?remote_addr,
            "Tunnel connection accepted"
        );

        let session = Session::new(connection.clone())
            .with_registry(self.registry.clone())
            .with_correlation_store(self.store.clone());

        if let Err(e) = session.run(queue, inbound, outbound).await {
            debug!(
                peer_id = %connection.peer_id(),
                code = e.code(),
                "Tunnel session ended with error: {}",
                e
            );
        }
    }

    /// Forward one call to `peer_id` and wait for its reply
    ///
    /// The request is written at most once; the caller learns success,
    /// `PeerNotConnected`, `DeliveryFailed` or `ReplyTimeout`, nothing else.
    /// The reply timeout bounds the whole call, including a slow write.
    pub async fn forward(
        &self,
        peer_id: &str,
        request_data: RequestData,
    ) -> Result<String, GatewayError> {
        let envelope = RequestEnvelope::new(peer_id, request_data);
        let request_id = envelope.request_id.clone();

        let connection = self
            .registry
            .lookup(peer_id)
            .ok_or_else(|| GatewayError::PeerNotConnected(peer_id.to_string()))?;

        // Waiter goes in before the write so a fast reply cannot slip past it
        let pending = self.store.expect(peer_id, &request_id);

        debug!(
            peer_id = %peer_id,
            request_id = %request_id,
            connection_id = %connection.connection_id(),
            "Forwarding request through tunnel"
        );

        // One deadline covers both the write and the wait for the reply
        let deadline = Instant::now() + self.reply_timeout;
        let timed_out = || GatewayError::ReplyTimeout {
            peer_id: peer_id.to_string(),
            request_id: request_id.clone(),
            timeout: self.reply_timeout,
        };

        let sent = tokio::time::timeout_at(
            deadline,
            connection.send_message(&TunnelMessage::Request(envelope)),
        )
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                warn!(
                    peer_id = %peer_id,
                    request_id = %request_id,
                    "Failed to send request to peer: {}",
                    source
                );
                return Err(GatewayError::DeliveryFailed {
                    peer_id: peer_id.to_string(),
                    source,
                });
            }
            Err(_) => {
                let e = timed_out();
                warn!(peer_id = %peer_id, request_id = %request_id, "Write not done before deadline: {}", e);
                return Err(e);
            }
        }

        let result = pending
            .wait(deadline.saturating_duration_since(Instant::now()))
            .await
            .map_err(|e| match e {
                GatewayError::ReplyTimeout { .. } => timed_out(),
                other => other,
            });
        match &result {
            Ok(body) => debug!(
                peer_id = %peer_id,
                request_id = %request_id,
                bytes = body.len(),
                "Reply received"
            ),
            Err(e) => warn!(peer_id = %peer_id, request_id = %request_id, "{}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::{SinkExt, StreamExt};
    use tunnelgate_proto::{ReplyEnvelope, TunnelCodec};

    struct FakePeer {
        inbound: fmpsc::UnboundedSender<Result<Frame, TransportError>>,
        outbound: fmpsc::UnboundedReceiver<Frame>,
    }

    async fn connect_peer(handler: &TunnelHandler, peer_id: &str) -> FakePeer {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let sink = out_tx.sink_map_err(|_| TransportError::ConnectionClosed);

        let task_handler = handler.clone();
        let id = peer_id.to_string();
        tokio::spawn(async move {
            task_handler.handle_connection(id, None, in_rx, sink).await;
        });

        for _ in 0..100 {
            if handler.registry().lookup(peer_id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        FakePeer {
            inbound: in_tx,
            outbound: out_rx,
        }
    }

    async fn next_request(peer: &mut FakePeer) -> RequestEnvelope {
        match peer.outbound.next().await {
            Some(Frame::Text(text)) => match TunnelCodec::decode(&text).unwrap() {
                TunnelMessage::Request(request) => request,
                other => panic!("Expected request, got {:?}", other),
            },
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    fn reply_frame(request_id: &str, payload: &str) -> Result<Frame, TransportError> {
        let reply = TunnelMessage::Reply(ReplyEnvelope::new(request_id, payload));
        Ok(Frame::Text(TunnelCodec::encode(&reply).unwrap()))
    }

    #[tokio::test]
    async fn test_forward_round_trip() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default());
        let mut peer = connect_peer(&handler, "agent-1").await;

        let caller = handler.clone();
        let call = tokio::spawn(async move {
            caller
                .forward("agent-1", RequestData::new("svc", "/health", "GET", ""))
                .await
        });

        let request = next_request(&mut peer).await;
        assert_eq!(request.peer_id, "agent-1");
        assert_eq!(request.request_data.service_endpoint, "/health");

        peer.inbound
            .unbounded_send(reply_frame(&request.request_id, "ok"))
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), "ok");
        assert!(handler.correlation_store().is_empty());

        // Exactly one envelope was written for the call
        assert!(peer.outbound.try_next().is_err());
    }

    #[tokio::test]
    async fn test_forward_to_unknown_peer() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default());

        let result = handler
            .forward("agent-x", RequestData::new("svc", "/health", "GET", ""))
            .await;
        assert!(matches!(result, Err(GatewayError::PeerNotConnected(id)) if id == "agent-x"));
    }

    #[tokio::test]
    async fn test_forward_times_out_without_reply() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default())
            .with_reply_timeout(Duration::from_millis(50));
        let mut peer = connect_peer(&handler, "agent-1").await;

        let caller = handler.clone();
        let call = tokio::spawn(async move {
            caller
                .forward("agent-1", RequestData::new("svc", "/slow", "GET", ""))
                .await
        });

        let request = next_request(&mut peer).await;
        let result = call.await.unwrap();
        assert!(matches!(result, Err(GatewayError::ReplyTimeout { .. })));

        // A late reply is held only as an orphan, for nobody
        peer.inbound
            .unbounded_send(reply_frame(&request.request_id, "too late"))
            .unwrap();
        for _ in 0..100 {
            if !handler.correlation_store().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.correlation_store().len(), 1);
    }

    #[tokio::test]
    async fn test_forward_delivery_failure() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default());

        // Registered connection whose writer is gone
        let (connection, queue) = TunnelConnection::new("agent-1", None);
        drop(queue);
        handler.registry().register(Arc::new(connection));

        let result = handler
            .forward("agent-1", RequestData::new("svc", "/health", "GET", ""))
            .await;
        assert!(matches!(result, Err(GatewayError::DeliveryFailed { .. })));
        assert!(handler.correlation_store().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls_to_same_peer_match_by_id() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default());
        let mut peer = connect_peer(&handler, "agent-1").await;

        let mut calls = Vec::new();
        for i in 0..3 {
            let caller = handler.clone();
            calls.push(tokio::spawn(async move {
                caller
                    .forward(
                        "agent-1",
                        RequestData::new("svc", format!("/item/{}", i), "GET", ""),
                    )
                    .await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut peer).await);
        }

        // Answer in reverse order of arrival
        for request in requests.iter().rev() {
            peer.inbound
                .unbounded_send(reply_frame(
                    &request.request_id,
                    &request.request_data.service_endpoint,
                ))
                .unwrap();
        }

        for (i, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap().unwrap(), format!("/item/{}", i));
        }
    }

    #[tokio::test]
    async fn test_forward_deadline_covers_stuck_write() {
        let handler = TunnelHandler::new(ConnectionRegistry::new(), CorrelationStore::default())
            .with_reply_timeout(Duration::from_millis(100));

        // Peer whose socket accepts nothing: the write never completes
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Frame, TransportError>>();
        let task_handler = handler.clone();
        tokio::spawn(async move {
            task_handler
                .handle_connection(
                    "agent-1".to_string(),
                    None,
                    in_rx,
                    crate::transport::testing::StuckSink,
                )
                .await;
        });
        for _ in 0..100 {
            if handler.registry().lookup("agent-1").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            handler.forward("agent-1", RequestData::new("svc", "/health", "GET", "")),
        )
        .await
        .expect("forward should not outlive its reply timeout");

        match result {
            Err(GatewayError::ReplyTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("Expected reply timeout, got {:?}", other),
        }
        assert!(handler.correlation_store().is_empty());
        drop(in_tx);
    }
}
