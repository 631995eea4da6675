//! Tunnelgate CLI - relay HTTP calls to peers over persistent tunnels
//!
//! `tunnelgate gateway` accepts tunnels and inbound calls; `tunnelgate agent`
//! dials a gateway and answers the calls it relays.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnelgate_agent::{Agent, AgentConfig, ReconnectConfig};
use tunnelgate_api::{GatewayConfig, GatewayServer};
use tunnelgate_proto::PeerRole;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Tunnelgate - relay HTTP calls to peers over persistent tunnels
#[derive(Parser, Debug)]
#[command(name = "tunnelgate")]
#[command(about = "Tunnelgate - relay HTTP calls to peers over persistent tunnels")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway: accept tunnels and relay inbound calls to them
    #[command(long_about = r#"
Run the gateway. Peers dial GET /ws with their identifier header; callers
POST {serviceName, serviceEndpoint, httpMethod, payload} to /gateway (agent
role) or /tunnel (client role) naming the target peer in the same header.

EXAMPLES:
  # Gateway for agents on the default port
  tunnelgate gateway --bind 0.0.0.0:8080

  # Gateway for clients (X-GV-CLIENTID header, POST /tunnel)
  tunnelgate gateway --role client

ENVIRONMENT VARIABLES:
  TUNNELGATE_BIND             Address to listen on
  TUNNELGATE_ROLE             Peer role (agent or client)
  TUNNELGATE_REPLY_TIMEOUT    Seconds a call waits for its reply
  TUNNELGATE_CORRELATION_TTL  Seconds an undelivered reply is kept
    "#)]
    Gateway {
        /// Address to listen on
        #[arg(long, env = "TUNNELGATE_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Role peers connect as (agent or client)
        #[arg(long, env = "TUNNELGATE_ROLE", default_value = "agent")]
        role: PeerRole,

        /// Seconds an inbound call waits for its reply
        #[arg(long, env = "TUNNELGATE_REPLY_TIMEOUT", default_value = "30")]
        reply_timeout: u64,

        /// Seconds an undelivered reply is kept before eviction
        #[arg(long, env = "TUNNELGATE_CORRELATION_TTL", default_value = "30")]
        correlation_ttl: u64,

        /// Enable permissive CORS (development only)
        #[arg(long, env = "TUNNELGATE_CORS")]
        cors: bool,
    },

    /// Run an agent: hold a tunnel to the gateway and answer its calls
    #[command(long_about = r#"
Connect to a gateway and answer the calls it relays by calling the named
service over HTTP. Automatically reconnects if the tunnel drops.

EXAMPLES:
  # Connect as agent-1
  tunnelgate agent --gateway ws://gateway.example.com:8080/ws --id agent-1

  # Connect as a client peer
  tunnelgate agent --gateway ws://localhost:8080/ws --id client-7 --role client

ENVIRONMENT VARIABLES:
  TUNNELGATE_GATEWAY          Gateway tunnel endpoint
  TUNNELGATE_PEER_ID          Peer identifier
  TUNNELGATE_ROLE             Peer role (agent or client)
    "#)]
    Agent {
        /// Gateway tunnel endpoint (e.g., ws://gateway.example.com:8080/ws)
        #[arg(long, env = "TUNNELGATE_GATEWAY", default_value = "ws://localhost:8080/ws")]
        gateway: String,

        /// Peer identifier (auto-generated if not specified)
        #[arg(long = "id", env = "TUNNELGATE_PEER_ID")]
        peer_id: Option<String>,

        /// Role to connect as (agent or client)
        #[arg(long, env = "TUNNELGATE_ROLE", default_value = "agent")]
        role: PeerRole,

        /// Seconds each service call may take
        #[arg(long, default_value = "30")]
        request_timeout: u64,

        /// Maximum reconnection attempts (0 = infinite)
        #[arg(long, default_value = "0")]
        max_reconnect_attempts: usize,

        /// Initial reconnection delay in seconds
        #[arg(long, default_value = "1")]
        reconnect_delay: u64,

        /// Maximum reconnection delay in seconds
        #[arg(long, default_value = "60")]
        max_reconnect_delay: u64,
    },
}

/// Setup logging; `RUST_LOG` wins over the verbosity flag
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    info!("Tunnelgate {}", VERSION);

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    match cli.command {
        Commands::Gateway {
            bind,
            role,
            reply_timeout,
            correlation_ttl,
            cors,
        } => {
            let config = GatewayConfig {
                bind_addr: bind,
                role,
                reply_timeout: Duration::from_secs(reply_timeout),
                correlation_ttl: Duration::from_secs(correlation_ttl),
                enable_cors: cors,
                ..GatewayConfig::default()
            };

            GatewayServer::new(config)
                .run(async move { shutdown.cancelled().await })
                .await
                .context("Gateway failed")?;

            info!("Gateway stopped");
            Ok(())
        }

        Commands::Agent {
            gateway,
            peer_id,
            role,
            request_timeout,
            max_reconnect_attempts,
            reconnect_delay,
            max_reconnect_delay,
        } => {
            let peer_id = peer_id.unwrap_or_else(|| {
                let id = format!("{}-{}", role, uuid::Uuid::new_v4());
                info!("Auto-generated peer ID: {}", id);
                id
            });

            let config = AgentConfig::new(gateway, peer_id)
                .with_role(role)
                .with_request_timeout(Duration::from_secs(request_timeout))
                .with_reconnect(ReconnectConfig {
                    initial_backoff: Duration::from_secs(reconnect_delay),
                    max_backoff: Duration::from_secs(max_reconnect_delay),
                    max_attempts: (max_reconnect_attempts > 0).then_some(max_reconnect_attempts),
                    ..ReconnectConfig::default()
                });

            let agent = Agent::new(config).context("Failed to create agent")?;
            agent
                .run_until(shutdown)
                .await
                .context("Agent failed")?;

            Ok(())
        }
    }
}
