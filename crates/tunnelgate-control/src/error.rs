//! Gateway error taxonomy

use std::time::Duration;
use thiserror::Error;
use tunnelgate_proto::CodecError;

use crate::transport::TransportError;

/// Errors surfaced by the gateway and its sessions
///
/// The first two are rejected at the API boundary, the next three reach the
/// external caller, and the last two only ever end the owning session.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Peer identifier header '{0}' not provided")]
    MissingIdentifier(String),

    #[error("Malformed request payload: {0}")]
    MalformedPayload(String),

    #[error("Peer '{0}' is not connected")]
    PeerNotConnected(String),

    #[error("Failed to deliver request to peer '{peer_id}': {source}")]
    DeliveryFailed {
        peer_id: String,
        #[source]
        source: TransportError,
    },

    #[error("No reply from peer '{peer_id}' for request {request_id} within {timeout:?}")]
    ReplyTimeout {
        peer_id: String,
        request_id: String,
        timeout: Duration,
    },

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(#[from] CodecError),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl GatewayError {
    /// Stable machine-readable code for API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingIdentifier(_) => "MISSING_IDENTIFIER",
            GatewayError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            GatewayError::PeerNotConnected(_) => "PEER_NOT_CONNECTED",
            GatewayError::DeliveryFailed { .. } => "DELIVERY_FAILED",
            GatewayError::ReplyTimeout { .. } => "REPLY_TIMEOUT",
            GatewayError::ProtocolDecode(_) => "PROTOCOL_DECODE_ERROR",
            GatewayError::ConnectionLost(_) => "CONNECTION_LOST",
        }
    }

    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingIdentifier(_) | GatewayError::MalformedPayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            GatewayError::MissingIdentifier("AGENT-ID".to_string()),
            GatewayError::MalformedPayload("eof".to_string()),
            GatewayError::PeerNotConnected("agent-x".to_string()),
            GatewayError::DeliveryFailed {
                peer_id: "agent-1".to_string(),
                source: TransportError::ConnectionClosed,
            },
            GatewayError::ReplyTimeout {
                peer_id: "agent-1".to_string(),
                request_id: "r1".to_string(),
                timeout: Duration::from_secs(30),
            },
            GatewayError::ConnectionLost("reset".to_string()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_client_errors() {
        assert!(GatewayError::MissingIdentifier("AGENT-ID".to_string()).is_client_error());
        assert!(GatewayError::MalformedPayload("bad".to_string()).is_client_error());
        assert!(!GatewayError::PeerNotConnected("agent-x".to_string()).is_client_error());
    }

    #[test]
    fn test_missing_identifier_message() {
        let err = GatewayError::MissingIdentifier("AGENT-ID".to_string());
        assert_eq!(err.to_string(), "Peer identifier header 'AGENT-ID' not provided");
    }
}
