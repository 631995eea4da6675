//! Control plane for the tunnel gateway
//!
//! Connection registry, reply correlation and the per-connection session
//! loop shared by the gateway and its peers.
pub mod connection;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod registry;
pub mod session;
pub mod transport;

pub use connection::{OutboundQueue, TunnelConnection};
pub use correlation::{CorrelationKey, CorrelationStore, DepositOutcome, PendingReply};
pub use error::GatewayError;
pub use handler::TunnelHandler;
pub use registry::{ConnectionRegistry, RegisteredPeer};
pub use session::{RequestDispatcher, Session, SessionState};
pub use transport::{Frame, TransportError, TransportResult};
