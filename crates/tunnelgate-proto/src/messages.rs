//! Protocol message types
//!
//! Field names are part of the wire contract and must stay stable: peers
//! written against the original JSON schema decode these envelopes directly.

use serde::{Deserialize, Serialize};
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Main tunnel protocol message enum
///
/// Frames carry no explicit tag; the variant is recognised by shape. A frame
/// with `requestID` + `requestData` is a request, one with `responseID` is a
/// reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TunnelMessage {
    /// Gateway asks the peer to execute local work
    Request(RequestEnvelope),
    /// Peer returns the result of a previous request
    Reply(ReplyEnvelope),
}

impl TunnelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelMessage::Request(_) => "request",
            TunnelMessage::Reply(_) => "reply",
        }
    }
}

impl From<RequestEnvelope> for TunnelMessage {
    fn from(envelope: RequestEnvelope) -> Self {
        TunnelMessage::Request(envelope)
    }
}

impl From<ReplyEnvelope> for TunnelMessage {
    fn from(envelope: ReplyEnvelope) -> Self {
        TunnelMessage::Reply(envelope)
    }
}

/// What the peer should call on the caller's behalf
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Base address of the local service (e.g. "http://localhost:9000")
    pub service_name: String,
    /// Path on that service (e.g. "/health")
    pub service_endpoint: String,
    /// HTTP method the peer should use
    pub http_method: String,
    /// Request body forwarded verbatim
    #[serde(default)]
    pub payload: String,
}

impl RequestData {
    pub fn new(
        service_name: impl Into<String>,
        service_endpoint: impl Into<String>,
        http_method: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_endpoint: service_endpoint.into(),
            http_method: http_method.into(),
            payload: payload.into(),
        }
    }

    /// URL the peer calls: service name and endpoint joined by a single `/`.
    ///
    /// A service name without a scheme is treated as plain HTTP.
    pub fn target_url(&self) -> String {
        let base = self.service_name.trim_end_matches('/');
        let path = self.service_endpoint.trim_start_matches('/');

        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };

        if path.is_empty() {
            base
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// Request written by the gateway to a peer's tunnel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    #[serde(rename = "requestID")]
    pub request_id: String,
    /// Older peers spell the key `agentID` or `clientID`
    #[serde(rename = "peerID", alias = "agentID", alias = "clientID")]
    pub peer_id: String,
    #[serde(rename = "requestData")]
    pub request_data: RequestData,
}

impl RequestEnvelope {
    /// Build a request with a freshly generated request ID
    pub fn new(peer_id: impl Into<String>, request_data: RequestData) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            peer_id: peer_id.into(),
            request_data,
        }
    }

    /// Reply to this request carrying `payload`
    pub fn reply(&self, payload: impl Into<String>) -> ReplyEnvelope {
        ReplyEnvelope::new(self.request_id.clone(), payload)
    }
}

/// Reply written by a peer, matched to its request by `responseID`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyEnvelope {
    /// Equals the `requestID` of the originating request.
    /// Older peers spell the key `reponseID`.
    #[serde(rename = "responseID", alias = "reponseID")]
    pub response_id: String,
    #[serde(default)]
    pub payload: String,
}

impl ReplyEnvelope {
    pub fn new(response_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            payload: payload.into(),
        }
    }
}
