//! Tunnel peer
//!
//! Dials the gateway, holds the tunnel open, and answers each request it
//! carries by calling the named service over HTTP.
pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reconnect;
pub mod ws;

pub use agent::Agent;
pub use config::AgentConfig;
pub use dispatcher::HttpDispatcher;
pub use error::AgentError;
pub use reconnect::{Backoff, ReconnectConfig};
