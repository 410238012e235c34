//! # pgrok tunnel client
//!
//! Dials the relay server's control-channel upgrade, registers a tunnel,
//! and forwards either public HTTP requests or multiplexed TCP streams
//! to a local service.
//!
//! ## Modules
//!
//! - [`config`]        — `start` / `start-tcp` CLI flags and `PGROK_*` env overrides
//! - [`supervisor`]     — the `Idle → Connecting → Connected → Draining → Backoff` state machine
//! - [`http_session`]   — HTTP tunnel processing loop (§4.4)
//! - [`tcp_session`]    — TCP tunnel processing loop (§4.5)
//! - [`http_forward`]   — forwards an envelope to the local HTTP service
//! - [`reverse_proxy`]  — optional local `$dispatch$` listener
//! - [`correlator`]     — pending-dispatch table for reverse-proxy mode
//! - [`error`]          — typed component-boundary errors

mod config;
mod correlator;
mod error;
mod http_forward;
mod http_session;
mod reverse_proxy;
mod supervisor;
mod tcp_session;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Cli, Command};
use crate::supervisor::BackoffPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tunnel_client=info".into()))
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested; cancelling the control-channel supervisor");
            cancel.cancel();
        })
    };

    let result = match cli.command {
        Command::Start(args) => run_http(args, cancel).await,
        Command::StartTcp(args) => run_tcp(args, cancel).await,
    };

    shutdown.abort();
    result
}

async fn run_http(args: config::StartArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let tunnel_id = config::resolve_tunnel_id(args.tunnel_id.as_deref());
    let url = args.control_channel_url(&tunnel_id);
    let http_client = reqwest::Client::new();
    let local_base_url = args.local_address.clone();
    let reverse_proxy_addr = args.proxy_port.map(|port| std::net::SocketAddr::from(([127, 0, 0, 1], port)));

    info!("starting HTTP tunnel '{tunnel_id}' -> {local_base_url}");
    supervisor::run(&url, cancel, BackoffPolicy::default(), move |ws| {
        let config = http_session::HttpSessionConfig {
            tunnel_id: tunnel_id.clone(),
            local_base_url: local_base_url.clone(),
            reverse_proxy_addr,
        };
        let http_client = http_client.clone();
        async move { http_session::run(ws, config, http_client).await }
    })
    .await?;
    Ok(())
}

async fn run_tcp(args: config::StartTcpArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let tunnel_id = config::resolve_tunnel_id(args.tunnel_id.as_deref());
    let url = args.control_channel_url(&tunnel_id);

    info!("starting TCP tunnel '{tunnel_id}' -> {}:{}", args.local_host, args.local_port);
    supervisor::run(&url, cancel, BackoffPolicy::default(), move |ws| {
        let config = tcp_session::TcpSessionConfig {
            tunnel_id: tunnel_id.clone(),
            local_host: args.local_host.clone(),
            local_port: args.local_port,
        };
        async move { tcp_session::run(ws, config).await }
    })
    .await?;
    Ok(())
}
