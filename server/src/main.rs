//! Binary entry point; see the crate root for module documentation.

use clap::Parser;
use tracing::info;
use tunnel_server::config::AppConfig;
use tunnel_server::state::AppState;
use tunnel_server::{build_router, reaper, tcp_tunnel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tunnel_server=info".into()),
        )
        .init();

    let config = AppConfig::parse();
    let bind_addr = config.bind_addr();
    let tcp_bind_addr = config.tcp_bind_addr();
    let state = AppState::new(config);
    let app = build_router(state.clone());

    tokio::spawn(reaper::run_heartbeat(state.clone()));
    tokio::spawn(reaper::run_idle_sweep(state.clone()));

    if let Some(tcp_addr) = tcp_bind_addr {
        let tcp_state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = tcp_tunnel::run_tcp_listener(tcp_addr, tcp_state).await {
                tracing::error!("tcp listener failed: {err}");
            }
        });
    }

    info!("pgrok relay listening on {bind_addr} (single_tunnel={})", state.registry.is_single_tunnel());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
