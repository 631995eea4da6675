//! Tunnel Protocol Definitions
//!
//! Wire envelopes exchanged between the gateway and its peers over the
//! persistent tunnel, plus the JSON codec used to frame them.

pub mod codec;
pub mod messages;
pub mod role;

pub use codec::{CodecError, TunnelCodec};
pub use messages::*;
pub use role::PeerRole;

use std::time::Duration;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// How long an inbound call waits for its reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime of a correlation entry, consumed or not
pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(30);

/// Identifier header sent by agents when opening the tunnel
pub const AGENT_ID_HEADER: &str = "AGENT-ID";

/// Identifier header sent by clients when opening the tunnel
pub const CLIENT_ID_HEADER: &str = "X-GV-CLIENTID";

/// Path of the tunnel upgrade endpoint
pub const TUNNEL_PATH: &str = "/ws";
