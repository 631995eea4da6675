use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunnelgate_control::RegisteredPeer;
use utoipa::ToSchema;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Tunnel protocol version
    pub protocol_version: u32,
    /// Role peers connect as ("agent" or "client")
    pub role: String,
    /// Connected peers count
    pub connected_peers: usize,
    /// Correlation entries not yet delivered or evicted
    pub pending_replies: usize,
}

/// A peer holding a tunnel open to this gateway
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerInfo {
    /// Peer identifier from the connection header
    pub peer_id: String,
    /// Identifier of the live tunnel connection
    pub connection_id: String,
    /// Remote socket address of the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    /// When the tunnel was established
    pub connected_at: DateTime<Utc>,
}

impl From<RegisteredPeer> for PeerInfo {
    fn from(peer: RegisteredPeer) -> Self {
        Self {
            peer_id: peer.peer_id,
            connection_id: peer.connection_id,
            remote_addr: peer.remote_addr.map(|addr| addr.to_string()),
            connected_at: peer.connected_at,
        }
    }
}

/// List of connected peers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerList {
    pub peers: Vec<PeerInfo>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
