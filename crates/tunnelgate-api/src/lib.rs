//! HTTP surface of the tunnel gateway
//!
//! Serves the tunnel endpoint peers dial into, the inbound call endpoint
//! callers POST to, and a small JSON API for health and connected peers.
pub mod handlers;
pub mod models;
pub mod ws;

use axum::{
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;

use tunnelgate_control::{ConnectionRegistry, CorrelationStore, TunnelHandler};
use tunnelgate_proto::{
    PeerRole, DEFAULT_CORRELATION_TTL, DEFAULT_REPLY_TIMEOUT, TUNNEL_PATH,
};

/// Application state shared across handlers
pub struct AppState {
    pub handler: TunnelHandler,
    pub role: PeerRole,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tunnelgate API",
        version = "0.1.0",
        description = "Relay calls to peers connected over persistent tunnels"
    ),
    paths(
        handlers::tunnel_upgrade,
        handlers::forward_call,
        handlers::health_check,
        handlers::list_peers,
    ),
    components(
        schemas(
            models::HealthResponse,
            models::PeerInfo,
            models::PeerList,
            models::ErrorResponse,
            tunnelgate_proto::RequestData,
        )
    ),
    tags(
        (name = "tunnel", description = "Tunnel and inbound call endpoints"),
        (name = "peers", description = "Connected peers"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

/// Gateway server configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the gateway
    pub bind_addr: SocketAddr,
    /// Role peers connect as; selects the identifier header and call path
    pub role: PeerRole,
    /// How long an inbound call waits for its reply
    pub reply_timeout: Duration,
    /// How long an undelivered reply is kept
    pub correlation_ttl: Duration,
    /// How often expired correlation entries are swept
    pub reaper_interval: Duration,
    /// Enable permissive CORS (for development)
    pub enable_cors: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            role: PeerRole::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            correlation_ttl: DEFAULT_CORRELATION_TTL,
            reaper_interval: Duration::from_secs(5),
            enable_cors: false,
        }
    }
}

/// Gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        let handler = TunnelHandler::new(
            ConnectionRegistry::new(),
            CorrelationStore::new(config.correlation_ttl),
        )
        .with_reply_timeout(config.reply_timeout);

        let state = Arc::new(AppState {
            handler,
            role: config.role,
        });

        Self { config, state }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn handler(&self) -> &TunnelHandler {
        &self.state.handler
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route(TUNNEL_PATH, get(handlers::tunnel_upgrade))
            .route(self.config.role.api_path(), post(handlers::forward_call))
            .route("/api/health", get(handlers::health_check))
            .route("/api/peers", get(handlers::list_peers))
            .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
            .with_state(self.state.clone());

        let mut router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown every tunnel is closed so their sessions end and the
    /// server can drain.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let local_addr = listener.local_addr()?;

        info!(
            role = %self.config.role,
            "Starting tunnel gateway on {}",
            local_addr
        );
        info!(
            "Tunnel endpoint: ws://{}{} (header {})",
            local_addr,
            TUNNEL_PATH,
            self.config.role.identifier_header()
        );
        info!(
            "Inbound calls: POST http://{}{}",
            local_addr,
            self.config.role.api_path()
        );

        let reaper = self
            .state
            .handler
            .correlation_store()
            .spawn_reaper(self.config.reaper_interval);

        let registry = self.state.handler.registry().clone();
        let shutdown = async move {
            shutdown.await;
            info!("Shutting down tunnel gateway");
            registry.close_all("gateway shutting down");
        };

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e));

        reaper.abort();
        result
    }
}
