//! # pgrok relay server
//!
//! Accepts control-channel connections from clients and multiplexes
//! public HTTP and TCP traffic over them.
//!
//! ## Architecture
//!
//! ```text
//! Public HTTP/TCP ──► Relay Server ──WS control channel──► Client ──► Local Service
//! ```
//!
//! ## Modules
//!
//! - [`config`]      — CLI flags and `PGROK_*` environment overrides
//! - [`state`]        — the tunnel registry and per-tunnel records
//! - [`correlator`]   — pending-request correlation for public HTTP traffic
//! - [`ws_handlers`]  — control-channel upgrade and frame processing loop
//! - [`http_tunnel`]  — public HTTP ingress and sibling dispatch forwarding
//! - [`tcp_tunnel`]   — public TCP listener and sub-stream multiplexing
//! - [`reaper`]       — heartbeat and idle sweep
//! - [`status`]       — the `/$status` HTML page
//! - [`api`]          — REST tunnel listing
//! - [`error`]        — typed component-boundary errors

pub mod api;
pub mod config;
pub mod correlator;
pub mod error;
pub mod http_tunnel;
pub mod reaper;
pub mod state;
pub mod status;
pub mod tcp_tunnel;
pub mod ws_handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Builds the public-facing axum router: control-channel upgrade,
/// status page, REST listing, and the public HTTP ingress fallback.
/// Split out from `main` so integration tests can drive the whole
/// router against an ephemeral listener without going through the CLI.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tunnel", get(ws_handlers::tunnel_upgrade))
        .route("/$status", get(status::status_page))
        .route("/api/tunnels", get(api::list_tunnels))
        .fallback(http_tunnel::public_ingress)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
