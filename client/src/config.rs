//! `start` / `start-tcp` CLI flags and `PGROK_*` environment overrides (§6).

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pgrok-client", version, about = "pgrok tunnel client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Forwards public HTTP traffic for a tunnel to a local HTTP service.
    Start(StartArgs),
    /// Forwards public TCP traffic for a tunnel to a local TCP service.
    StartTcp(StartTcpArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct StartArgs {
    /// The tunnel id to register under; omit to let the server mint one.
    #[arg(long = "tunnelId", env = "PGROK_TUNNELID")]
    pub tunnel_id: Option<String>,

    /// Relay server base address, e.g. `ws://localhost:8080`.
    #[arg(long = "serverAddress", env = "PGROK_SERVERADDRESS")]
    pub server_address: String,

    /// Base URL of the local HTTP service to forward requests to.
    #[arg(long = "localAddress", env = "PGROK_LOCALADDRESS")]
    pub local_address: String,

    /// Local port for the optional reverse-proxy (`$dispatch$`) listener.
    #[arg(long = "proxyPort", env = "PGROK_PROXYPORT")]
    pub proxy_port: Option<u16>,
}

#[derive(Debug, Parser, Clone)]
pub struct StartTcpArgs {
    /// The tunnel id to register under; omit to let the server mint one.
    #[arg(long = "tunnelId", env = "PGROK_TUNNELID")]
    pub tunnel_id: Option<String>,

    /// Relay server base address, e.g. `ws://localhost:8080`.
    #[arg(long = "serverAddress", env = "PGROK_SERVERADDRESS")]
    pub server_address: String,

    /// Host of the local TCP service to dial on each `init`.
    #[arg(long = "localHost", env = "PGROK_LOCALHOST_ADDR", default_value = "127.0.0.1")]
    pub local_host: String,

    /// Port of the local TCP service to dial on each `init`.
    #[arg(long = "localPort", env = "PGROK_LOCALPORT")]
    pub local_port: u16,
}

impl StartArgs {
    pub fn control_channel_url(&self, tunnel_id: &str) -> String {
        control_channel_url(&self.server_address, tunnel_id, "http")
    }
}

impl StartTcpArgs {
    pub fn control_channel_url(&self, tunnel_id: &str) -> String {
        control_channel_url(&self.server_address, tunnel_id, "tcp")
    }
}

fn control_channel_url(server_address: &str, tunnel_id: &str, kind: &str) -> String {
    let base = server_address.trim_end_matches('/');
    format!("{base}/tunnel?id={tunnel_id}&kind={kind}")
}

/// Resolves a stable tunnel id up front so the same id survives every
/// reconnect attempt the supervisor makes — the server has no channel to
/// hand a minted id back to the client once the control channel drops, so
/// the client mints its own when the operator didn't supply one.
pub fn resolve_tunnel_id(supplied: Option<&str>) -> String {
    supplied.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
