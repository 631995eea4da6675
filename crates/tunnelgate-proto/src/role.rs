//! Peer roles
//!
//! Agents and clients speak the same protocol; they only differ in which
//! header carries their identifier and where callers reach them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AGENT_ID_HEADER, CLIENT_ID_HEADER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Edge agents, addressed through `POST /gateway`
    #[default]
    Agent,
    /// Client processes, addressed through `POST /tunnel`
    Client,
}

impl PeerRole {
    /// Header carrying the peer identifier, on both the upgrade and the inbound call
    pub fn identifier_header(&self) -> &'static str {
        match self {
            PeerRole::Agent => AGENT_ID_HEADER,
            PeerRole::Client => CLIENT_ID_HEADER,
        }
    }

    /// Path of the inbound API endpoint for this role
    pub fn api_path(&self) -> &'static str {
        match self {
            PeerRole::Agent => "/gateway",
            PeerRole::Client => "/tunnel",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Agent => "agent",
            PeerRole::Client => "client",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(PeerRole::Agent),
            "client" => Ok(PeerRole::Client),
            other => Err(format!(
                "Unknown peer role '{}' (expected 'agent' or 'client')",
                other
            )),
        }
    }
}
