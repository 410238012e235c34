//! REST API endpoints for querying server state (§4.2 `snapshot`).
//!
//! Generalizes the teacher's `list_agents` endpoint (a single agent-id
//! array) into a full tunnel listing.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct TunnelListItem {
    pub id: String,
    pub kind: &'static str,
    pub request_count: u64,
    pub active_streams: usize,
}

/// `GET /api/tunnels` — returns a JSON array of every registered tunnel.
pub async fn list_tunnels(State(state): State<AppState>) -> Json<Vec<TunnelListItem>> {
    let items = state
        .registry
        .snapshot()
        .into_iter()
        .map(|t| TunnelListItem {
            id: t.id,
            kind: t.kind_label,
            request_count: t.request_count,
            active_streams: t.active_streams,
        })
        .collect();
    Json(items)
}
