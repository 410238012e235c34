//! The control channel: upgrading `/tunnel` to a WebSocket, and the
//! exhaustive frame-processing loop that drives every tunnel's lifetime
//! (§4.1, §4.2, §4.8).
//!
//! Generalizes the teacher's `handle_connection`/`handle_message` shape
//! (one outbound-draining task plus one inbound-matching loop per
//! connection) to the spec's tagged `Frame` union instead of the
//! teacher's flat `WsMessage` enum.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tunnel_protocol::{Frame, TcpEnvelope, TcpFrameKind};

use crate::error::RegistryError;
use crate::http_tunnel::forward_dispatch;
use crate::state::{mint_tunnel_id, AppState, TunnelKind, TunnelRecord};

#[derive(Debug, Deserialize)]
pub struct TunnelQuery {
    id: Option<String>,
    #[serde(default)]
    kind: TunnelKindQuery,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TunnelKindQuery {
    #[default]
    Http,
    Tcp,
}

/// `GET /tunnel?id=<id>&kind=<http|tcp>` — the control-channel upgrade
/// endpoint a client opens once per tunnel (§4.2).
pub async fn tunnel_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<TunnelQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_control_channel(socket, state, query))
}

async fn handle_control_channel(mut socket: WebSocket, state: AppState, query: TunnelQuery) {
    let id = query.id.unwrap_or_else(mint_tunnel_id);
    let kind = match query.kind {
        TunnelKindQuery::Http => TunnelKind::Http,
        TunnelKindQuery::Tcp => TunnelKind::Tcp,
    };

    if let Some(hook) = &state.auth_hook {
        if !hook(&id) {
            warn!("rejecting tunnel '{id}': authentication hook denied the connect attempt");
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1008,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    }

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let record = TunnelRecord::new(id.clone(), kind, tx.clone());

    if let Err(err) = state.registry.register(id.clone(), record.clone()) {
        warn!("rejecting tunnel '{id}': {err}");
        let _ = sink.send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code: close_code_for(&err),
            reason: err.to_string().into(),
        }))).await;
        return;
    }
    info!("tunnel '{id}' registered ({kind:?})", kind = record.kind);

    // Serializes every outbound send through one task so frames from the
    // correlator, the dispatch forwarder, and the reaper never interleave
    // on the wire (§5 "Shared-resource policy").
    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match tunnel_protocol::encode(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!("failed to encode outbound frame: {err}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!("control channel '{id}' read error: {err}");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                record.touch().await;
                match tunnel_protocol::decode(&text) {
                    Ok(frame) => handle_frame(&state, &record, frame).await,
                    Err(err) => debug!("dropping unparseable frame on '{id}': {err}"),
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    info!("tunnel '{id}' disconnected");
    outbound_task.abort();
    record.correlator.drain(|request_id| {
        tunnel_protocol::HttpResponseEnvelope::synthetic_error(
            request_id.to_string(),
            503,
            "Service Unavailable",
            "the tunnel disconnected before responding",
        )
    });
    state.registry.remove(&id);
}

fn close_code_for(err: &RegistryError) -> u16 {
    match err {
        RegistryError::IdInUse(_) | RegistryError::SingleTunnelOccupied | RegistryError::TcpConflict => 1008, // policy violation
        RegistryError::NotFound(_) => 1011,
    }
}

async fn handle_frame(state: &AppState, record: &Arc<TunnelRecord>, frame: Frame) {
    match frame {
        Frame::Ping => {
            let _ = record.send(Frame::Pong);
        }
        Frame::Pong => {
            // `touch()` already ran for every inbound text frame above.
        }
        Frame::Dispatch(request) => {
            let state = state.clone();
            let record = record.clone();
            tokio::spawn(async move {
                let response = forward_dispatch(&state, request).await;
                let _ = record.send(Frame::DispatchResponse(response));
            });
        }
        Frame::DispatchResponse(_) => {
            debug!("tunnel '{}' sent a dispatch response unsolicited; ignoring", record.id);
        }
        Frame::HttpResponse(response) => {
            if !record.correlator.complete(&response.request_id, response.clone()) {
                debug!(
                    "tunnel '{}' responded to unknown or already-completed request '{}'",
                    record.id, response.request_id
                );
            }
        }
        Frame::HttpRequest(_) => {
            debug!("tunnel '{}' sent a bare http request; only servers originate these", record.id);
        }
        Frame::WsRelay(_) => {
            debug!("tunnel '{}' sent a websocket relay frame; passthrough is not wired up", record.id);
        }
        Frame::Tcp(envelope) => handle_tcp_envelope(record, envelope).await,
    }
}

/// Routes inbound TCP sub-stream frames (§4.5). `Init` always travels
/// server-to-client, so an inbound `Init` is a protocol violation and is
/// logged and dropped rather than acted upon.
async fn handle_tcp_envelope(record: &Arc<TunnelRecord>, envelope: TcpEnvelope) {
    if envelope.is_heartbeat() {
        record.touch().await;
        return;
    }
    match envelope.kind {
        TcpFrameKind::Init => {
            debug!("tunnel '{}' sent an Init frame; only the server originates these", record.id);
        }
        TcpFrameKind::Data => {
            let Some(stream) = record.tcp_streams.get(&envelope.connection_id) else {
                debug!(
                    "tunnel '{}' sent data for unknown connection '{}'",
                    record.id, envelope.connection_id
                );
                return;
            };
            *stream.last_activity.lock().await = std::time::Instant::now();
            if let Some(data) = envelope.data {
                let _ = stream.data_tx.send(data);
            }
        }
        TcpFrameKind::Close | TcpFrameKind::Error => {
            if let Some((_, stream)) = record.tcp_streams.remove(&envelope.connection_id) {
                stream.reader_handle.abort();
            }
        }
        TcpFrameKind::Control => {
            record.touch().await;
        }
    }
}
