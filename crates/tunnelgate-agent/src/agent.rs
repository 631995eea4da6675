use futures::StreamExt;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunnelgate_control::{RequestDispatcher, Session, TunnelConnection};

use crate::config::AgentConfig;
use crate::dispatcher::HttpDispatcher;
use crate::error::AgentError;
use crate::reconnect::Backoff;
use crate::ws;

type GatewaySocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// The tunnel agent - holds a tunnel to the gateway and serves its requests
pub struct Agent {
    config: AgentConfig,
    dispatcher: Arc<dyn RequestDispatcher>,
}

impl Agent {
    /// Create an agent that answers requests over HTTP
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let dispatcher = HttpDispatcher::new(config.request_timeout)?;

        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Replace the dispatcher that answers requests
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Keep a tunnel open until `shutdown` is cancelled, reconnecting with backoff
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        info!(
            peer_id = %self.config.peer_id,
            gateway = %self.config.gateway_url,
            role = %self.config.role,
            "Starting agent"
        );

        while !shutdown.is_cancelled() {
            let connected = tokio::select! {
                result = self.connect() => result,
                _ = shutdown.cancelled() => break,
            };

            match connected {
                Ok(socket) => {
                    backoff.reset();
                    match self.serve(socket, &shutdown).await {
                        Ok(()) => info!(peer_id = %self.config.peer_id, "Tunnel closed"),
                        Err(e) => warn!(peer_id = %self.config.peer_id, "Tunnel lost: {}", e),
                    }
                }
                Err(e) => {
                    error!(
                        peer_id = %self.config.peer_id,
                        gateway = %self.config.gateway_url,
                        "Failed to connect to gateway: {}",
                        e
                    );
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            let delay = backoff
                .next_delay()
                .ok_or(AgentError::ReconnectExhausted(backoff.attempt()))?;
            info!(
                attempt = backoff.attempt(),
                "Reconnecting in {:?}",
                delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(peer_id = %self.config.peer_id, "Agent stopped");
        Ok(())
    }

    /// Dial the gateway, identifying with the role's header
    async fn connect(&self) -> Result<GatewaySocket, AgentError> {
        let mut request = self.config.gateway_url.as_str().into_client_request()?;
        let header = HeaderName::from_bytes(self.config.role.identifier_header().as_bytes())
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        let peer_id = HeaderValue::from_str(&self.config.peer_id)
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        request.headers_mut().insert(header, peer_id);

        let (socket, response) = tokio_tungstenite::connect_async(request).await?;
        info!(
            peer_id = %self.config.peer_id,
            status = response.status().as_u16(),
            "Connected to gateway"
        );

        Ok(socket)
    }

    /// Run one tunnel session until the gateway closes it, it fails, or shutdown
    async fn serve(
        &self,
        socket: GatewaySocket,
        shutdown: &CancellationToken,
    ) -> Result<(), AgentError> {
        let (connection, queue) = TunnelConnection::new(self.config.peer_id.clone(), None);
        let connection = Arc::new(connection);
        let (sink, stream) = socket.split();

        let session = Session::new(connection.clone()).with_dispatcher(self.dispatcher.clone());
        let run = session.run(queue, ws::inbound_frames(stream), ws::outbound_frames(sink));
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            _ = shutdown.cancelled() => {
                // The writer closes the socket on its way out, which sends the close frame
                debug!(peer_id = %self.config.peer_id, "Closing tunnel for shutdown");
                connection.close("agent shutting down");
                run.await
            }
        };

        result.map_err(AgentError::from)
    }
}
