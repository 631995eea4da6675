//! Per-connection session loop
//!
//! One session runs for every tunnel connection, on the gateway and on the
//! peer alike. It reads frames in receipt order, routes replies to the
//! correlation store and requests to the local dispatcher, and on every exit
//! path unregisters its own connection and releases it.

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};
use tunnelgate_proto::{ReplyEnvelope, RequestEnvelope, TunnelCodec, TunnelMessage};

use crate::connection::{drive_writer, OutboundQueue, TunnelConnection};
use crate::correlation::CorrelationStore;
use crate::error::GatewayError;
use crate::registry::ConnectionRegistry;
use crate::transport::{Frame, TransportError};

/// Executes tunneled requests locally (peer side)
#[async_trait]
pub trait RequestDispatcher: Send + Sync + 'static {
    /// Run the request and return the reply body
    async fn dispatch(&self, request: RequestEnvelope) -> String;
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

enum FrameAction {
    Continue,
    Stop(Result<(), GatewayError>),
}

/// Releases the connection on every way out of the session, panics and
/// cancelled futures included.
struct SessionGuard {
    connection: Arc<TunnelConnection>,
    registry: Option<ConnectionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.unregister(self.connection.peer_id(), self.connection.connection_id());
        }
        self.connection.close("session ended");
        debug!(
            peer_id = %self.connection.peer_id(),
            connection_id = %self.connection.connection_id(),
            state = %SessionState::Closed,
            "Session released"
        );
    }
}

/// A tunnel session
pub struct Session {
    connection: Arc<TunnelConnection>,
    registry: Option<ConnectionRegistry>,
    store: Option<CorrelationStore>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
}

impl Session {
    pub fn new(connection: Arc<TunnelConnection>) -> Self {
        Self {
            connection,
            registry: None,
            store: None,
            dispatcher: None,
        }
    }

    /// Register the connection on start and unregister it on exit
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Deposit reply frames into this store
    pub fn with_correlation_store(mut self, store: CorrelationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Execute request frames with this dispatcher
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn connection(&self) -> &Arc<TunnelConnection> {
        &self.connection
    }

    /// Run until the peer disconnects, a frame fails to decode, a write
    /// fails, or the connection is closed locally.
    ///
    /// `Ok(())` means an orderly end; errors are `ProtocolDecode` or
    /// `ConnectionLost` and concern this session only.
    pub async fn run<R, W>(
        self,
        queue: OutboundQueue,
        mut inbound: R,
        outbound: W,
    ) -> Result<(), GatewayError>
    where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin + Send,
        W: Sink<Frame, Error = TransportError> + Unpin + Send + 'static,
    {
        let peer_id = self.connection.peer_id().to_string();
        let connection_id = self.connection.connection_id().to_string();
        let shutdown = self.connection.shutdown_token();

        let writer = tokio::spawn(drive_writer(
            outbound,
            queue,
            shutdown.clone(),
            connection_id.clone(),
        ));

        if let Some(registry) = &self.registry {
            if let Some(previous) = registry.register(self.connection.clone()) {
                previous.close("superseded by a newer connection");
            }
        }

        let guard = SessionGuard {
            connection: self.connection.clone(),
            registry: self.registry.clone(),
        };

        info!(
            peer_id = %peer_id,
            connection_id = %connection_id,
            state = %SessionState::Open,
            "Tunnel session started"
        );

        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(peer_id = %peer_id, "Session closed locally");
                    break Ok(());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(peer_id = %peer_id, "Request dispatch task panicked");
                        }
                    }
                }
                next = inbound.next() => match next {
                    None => {
                        debug!(peer_id = %peer_id, "Tunnel stream ended");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        break Err(GatewayError::ConnectionLost(e.to_string()));
                    }
                    Some(Ok(frame)) => match self.handle_frame(frame, &mut tasks) {
                        FrameAction::Continue => {}
                        FrameAction::Stop(result) => break result,
                    },
                },
            }
        };

        tasks.abort_all();
        drop(guard);

        // A write that failed while the read side looked healthy still ends
        // the session with an error
        let result = match (result, writer.await) {
            (Ok(()), Ok(Err(e))) => Err(GatewayError::ConnectionLost(e.to_string())),
            (result, _) => result,
        };

        match &result {
            Ok(()) => info!(
                peer_id = %peer_id,
                connection_id = %connection_id,
                state = %SessionState::Closing,
                "Tunnel session ending"
            ),
            Err(e) => warn!(
                peer_id = %peer_id,
                connection_id = %connection_id,
                state = %SessionState::Closing,
                error = %e,
                "Tunnel session terminated"
            ),
        }

        result
    }

    fn handle_frame(&self, frame: Frame, tasks: &mut JoinSet<()>) -> FrameAction {
        let decoded = match frame {
            Frame::Text(text) => TunnelCodec::decode(&text),
            Frame::Binary(bytes) => TunnelCodec::decode_bytes(&bytes),
            Frame::Ping(_) | Frame::Pong(_) => return FrameAction::Continue,
            Frame::Close(reason) => {
                debug!(
                    peer_id = %self.connection.peer_id(),
                    reason = reason.as_deref().unwrap_or(""),
                    "Peer sent close frame"
                );
                return FrameAction::Stop(Ok(()));
            }
        };

        match decoded {
            Ok(TunnelMessage::Reply(reply)) => self.route_reply(reply),
            Ok(TunnelMessage::Request(request)) => self.route_request(request, tasks),
            Err(e) => return FrameAction::Stop(Err(GatewayError::ProtocolDecode(e))),
        }

        FrameAction::Continue
    }

    fn route_reply(&self, reply: ReplyEnvelope) {
        let Some(store) = &self.store else {
            warn!(
                peer_id = %self.connection.peer_id(),
                response_id = %reply.response_id,
                "Reply frame received but this side keeps no correlation store, dropping"
            );
            return;
        };

        trace!(
            peer_id = %self.connection.peer_id(),
            response_id = %reply.response_id,
            bytes = reply.payload.len(),
            "Reply frame received"
        );
        store.deposit(self.connection.peer_id(), &reply.response_id, reply.payload);
    }

    fn route_request(&self, request: RequestEnvelope, tasks: &mut JoinSet<()>) {
        let Some(dispatcher) = self.dispatcher.clone() else {
            warn!(
                peer_id = %self.connection.peer_id(),
                request_id = %request.request_id,
                "Request frame received but this side has no dispatcher, dropping"
            );
            return;
        };

        debug!(
            request_id = %request.request_id,
            service = %request.request_data.service_name,
            endpoint = %request.request_data.service_endpoint,
            method = %request.request_data.http_method,
            "Dispatching tunneled request"
        );

        let connection = self.connection.clone();
        tasks.spawn(async move {
            let request_id = request.request_id.clone();
            let body = dispatcher.dispatch(request).await;
            let reply = TunnelMessage::Reply(ReplyEnvelope::new(request_id.clone(), body));

            if let Err(e) = connection.send_message(&reply).await {
                warn!(request_id = %request_id, "Failed to write reply: {}", e);
            }
        });
    }
}
