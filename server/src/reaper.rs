//! Liveness heartbeat and idle sweep (§4.8).
//!
//! Two independent cadences share the same registry: a fast heartbeat
//! that force-closes a tunnel after two missed pings, and a slow sweep
//! that disposes tunnels idle past a configurable threshold.

use std::time::Duration;

use tokio::time::interval;
use tracing::info;
use tunnel_protocol::Frame;

use crate::state::AppState;

/// Ping cadence and the miss count that forces a close (§4.8).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PINGS: u64 = 2;

/// Idle-sweep cadence; the threshold itself is `AppConfig::idle_threshold_secs`.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Runs forever, pinging every registered tunnel and force-closing any
/// that fail to answer within `MAX_MISSED_PINGS` rounds.
pub async fn run_heartbeat(state: AppState) {
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        heartbeat_tick(&state);
    }
}

/// One heartbeat round, factored out so it can be exercised without
/// waiting on the real 30s cadence.
fn heartbeat_tick(state: &AppState) {
    for id in state.registry.ids() {
        let Some(tunnel) = state.registry.lookup(&id) else { continue };
        let missed = tunnel.pending_pings.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if missed >= MAX_MISSED_PINGS {
            info!("tunnel '{id}' missed {MAX_MISSED_PINGS} consecutive pings; closing");
            state.registry.remove(&id);
            continue;
        }
        let _ = tunnel.send(Frame::Ping);
    }
}

/// Runs forever, disposing tunnels that have been idle beyond
/// `idle_threshold_secs` (§4.8 "periodic sweep").
pub async fn run_idle_sweep(state: AppState) {
    let threshold = Duration::from_secs(state.config.idle_threshold_secs);
    let mut ticker = interval(IDLE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        sweep_once(&state, threshold).await;
    }
}

/// One idle-sweep round, factored out so it can be exercised without
/// waiting on the real 5-minute cadence.
async fn sweep_once(state: &AppState, threshold: Duration) {
    for id in state.registry.ids() {
        let Some(tunnel) = state.registry.lookup(&id) else { continue };
        if tunnel.idle_for().await >= threshold {
            info!("tunnel '{id}' idle for over {}s; disposing", threshold.as_secs());
            state.registry.remove(&id);
        }
    }
}
