use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tunnelgate_control::GatewayError;

/// Errors that can occur in the agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Session error: {0}")]
    Session(#[from] GatewayError),

    #[error("Gave up reconnecting after {0} attempts")]
    ReconnectExhausted(usize),
}
