use std::time::Duration;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tunnelgate_proto::{PeerRole, DEFAULT_REPLY_TIMEOUT};

use crate::error::AgentError;
use crate::reconnect::ReconnectConfig;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Tunnel endpoint of the gateway (e.g., "ws://gateway.example.com:8080/ws")
    pub gateway_url: String,

    /// Identifier this peer registers under
    pub peer_id: String,

    /// Role to connect as; selects the identifier header
    pub role: PeerRole,

    /// Timeout for each call made on behalf of the gateway
    pub request_timeout: Duration,

    /// Reconnection backoff
    pub reconnect: ReconnectConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://localhost:8080/ws".to_string(),
            peer_id: uuid::Uuid::new_v4().to_string(),
            role: PeerRole::default(),
            request_timeout: DEFAULT_REPLY_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(gateway_url: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            peer_id: peer_id.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: PeerRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if !(self.gateway_url.starts_with("ws://") || self.gateway_url.starts_with("wss://")) {
            return Err(AgentError::InvalidConfig(format!(
                "gateway URL must use ws:// or wss://, got '{}'",
                self.gateway_url
            )));
        }

        if self.peer_id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("peer ID is empty".to_string()));
        }

        // The identifier travels as a header value
        HeaderValue::from_str(&self.peer_id).map_err(|_| {
            AgentError::InvalidConfig(format!(
                "peer ID '{}' is not a valid header value",
                self.peer_id
            ))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.role, PeerRole::Agent);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_http_url() {
        let config = AgentConfig::new("http://localhost:8080/ws", "agent-1");
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_peer_id() {
        assert!(AgentConfig::new("ws://localhost:8080/ws", "  ")
            .validate()
            .is_err());
        assert!(AgentConfig::new("ws://localhost:8080/ws", "agent\n1")
            .validate()
            .is_err());
    }
}
