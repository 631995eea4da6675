use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunnelgate_control::GatewayError;
use tunnelgate_proto::{RequestData, MAX_FRAME_SIZE, PROTOCOL_VERSION};

use crate::models::*;
use crate::ws;
use crate::AppState;

/// Map a gateway error onto its HTTP status and JSON body
pub fn error_response(error: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match error {
        GatewayError::MissingIdentifier(_) | GatewayError::MalformedPayload(_) => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::PeerNotConnected(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: Some(error.code().to_string()),
        }),
    )
}

/// Read a non-empty peer identifier from `header`
fn peer_identifier(headers: &HeaderMap, header: &str) -> Result<String, GatewayError> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::MissingIdentifier(header.to_string()))
}

/// Accept a peer's tunnel
///
/// The peer identifies itself with the role's identifier header; requests
/// without it are refused before the upgrade.
#[utoipa::path(
    get,
    path = "/ws",
    params(
        ("AGENT-ID" = Option<String>, Header, description = "Peer identifier (agent role)"),
        ("X-GV-CLIENTID" = Option<String>, Header, description = "Peer identifier (client role)")
    ),
    responses(
        (status = 101, description = "Switching to the tunnel protocol"),
        (status = 400, description = "Identifier header missing", body = ErrorResponse)
    ),
    tag = "tunnel"
)]
pub async fn tunnel_upgrade(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let peer_id = match peer_identifier(&headers, state.role.identifier_header()) {
        Ok(peer_id) => peer_id,
        Err(e) => {
            warn!(remote_addr = %remote_addr, "Rejecting tunnel: {}", e);
            return error_response(&e).into_response();
        }
    };

    debug!(peer_id = %peer_id, remote_addr = %remote_addr, "Upgrading tunnel connection");

    let handler = state.handler.clone();
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            handler
                .handle_connection(
                    peer_id,
                    Some(remote_addr),
                    ws::inbound_frames(stream),
                    ws::outbound_frames(sink),
                )
                .await;
        })
}

/// Forward a call to a connected peer and return its reply
///
/// Served at `/gateway` for the agent role and `/tunnel` for the client role.
#[utoipa::path(
    post,
    path = "/gateway",
    params(
        ("AGENT-ID" = String, Header, description = "Target peer identifier (X-GV-CLIENTID for the client role)")
    ),
    request_body = RequestData,
    responses(
        (status = 200, description = "Raw reply payload from the peer", body = String),
        (status = 400, description = "Identifier header or body missing or malformed", body = ErrorResponse),
        (status = 404, description = "Peer not connected", body = ErrorResponse),
        (status = 500, description = "Delivery failed or reply timed out", body = ErrorResponse)
    ),
    tag = "tunnel"
)]
pub async fn forward_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let peer_id =
        peer_identifier(&headers, state.role.identifier_header()).map_err(|e| error_response(&e))?;

    let request_data: RequestData = serde_json::from_slice(&body).map_err(|e| {
        debug!(peer_id = %peer_id, "Rejecting call with malformed body: {}", e);
        error_response(&GatewayError::MalformedPayload(e.to_string()))
    })?;

    info!(
        peer_id = %peer_id,
        service = %request_data.service_name,
        endpoint = %request_data.service_endpoint,
        method = %request_data.http_method,
        "Forwarding call"
    );

    state
        .handler
        .forward(&peer_id, request_data)
        .await
        .map_err(|e| error_response(&e))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION,
        role: state.role.to_string(),
        connected_peers: state.handler.registry().count(),
        pending_replies: state.handler.correlation_store().len(),
    })
}

/// List connected peers
#[utoipa::path(
    get,
    path = "/api/peers",
    responses(
        (status = 200, description = "Peers with a live tunnel", body = PeerList)
    ),
    tag = "peers"
)]
pub async fn list_peers(State(state): State<Arc<AppState>>) -> Json<PeerList> {
    let peers: Vec<PeerInfo> = state
        .handler
        .registry()
        .list()
        .into_iter()
        .map(PeerInfo::from)
        .collect();
    let total = peers.len();

    Json(PeerList { peers, total })
}
