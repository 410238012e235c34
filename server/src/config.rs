//! `start-server` CLI flags and `PGROK_*` environment overrides (§6).
//!
//! Grounded on the CLI-fronted tunnel tools across the example pack
//! (`bore`, `localup`, `ztunnel` all parse flags with `clap`'s derive
//! API) rather than the teacher's hardcoded `SocketAddr::from(([0,0,0,0], 7070))`.

use clap::Parser;

/// Starts the relay server: the public HTTP/TCP listeners and the
/// control-channel upgrade endpoint.
#[derive(Debug, Parser, Clone)]
#[command(name = "start-server", version, about = "Tunnel relay server")]
pub struct AppConfig {
    /// Port for the public HTTP listener and the `/tunnel` control-channel upgrade.
    #[arg(long, env = "PGROK_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Bind only to 127.0.0.1 instead of all interfaces.
    #[arg(long, env = "PGROK_LOCALHOST", default_value_t = false)]
    pub localhost: bool,

    /// Admit at most one tunnel; all public paths route to it (§4.2).
    #[arg(long = "singleTunnel", env = "PGROK_SINGLE_TUNNEL", default_value_t = false)]
    pub single_tunnel: bool,

    /// Port for the public raw-TCP listener. Omit to disable TCP tunnels.
    #[arg(long = "tcpPort", env = "PGROK_TCPPORT")]
    pub tcp_port: Option<u16>,

    /// Reserved for parity with the client's `--proxyPort` flag; the
    /// server itself has no local reverse-proxy listener to bind.
    #[arg(long = "proxyPort", env = "PGROK_PROXYPORT")]
    pub proxy_port: Option<u16>,

    /// Idle threshold in seconds before the reaper disposes a tunnel (§4.8).
    #[arg(long = "idleSeconds", default_value_t = 1800)]
    pub idle_threshold_secs: u64,
}

impl AppConfig {
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        let host = if self.localhost {
            std::net::Ipv4Addr::LOCALHOST
        } else {
            std::net::Ipv4Addr::UNSPECIFIED
        };
        std::net::SocketAddr::from((host, self.port))
    }

    pub fn tcp_bind_addr(&self) -> Option<std::net::SocketAddr> {
        let host = if self.localhost {
            std::net::Ipv4Addr::LOCALHOST
        } else {
            std::net::Ipv4Addr::UNSPECIFIED
        };
        self.tcp_port.map(|port| std::net::SocketAddr::from((host, port)))
    }
}
