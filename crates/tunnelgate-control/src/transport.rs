//! Transport-neutral frame types
//!
//! Both the gateway (axum WebSocket) and the agent (tokio-tungstenite) adapt
//! their sockets to a `Stream` of [`Frame`]s and a `Sink` of [`Frame`]s so the
//! session loop is written once.

use thiserror::Error;
use tunnelgate_proto::CodecError;

/// One WebSocket-level frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Encode error: {0}")]
    Encode(#[from] CodecError),
}

pub type TransportResult<T> = Result<T, TransportError>;
