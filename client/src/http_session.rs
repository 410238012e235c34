//! HTTP tunnel — client side (§4.4): the per-connection processing loop
//! the supervisor hands a freshly-upgraded control channel to.
//!
//! Grounded on the teacher's `agent.rs::run_agent_loop` connection body
//! (outbound-sender task + heartbeat task + inbound-matching loop,
//! cleaned up together on disconnect) generalized from the teacher's
//! flat `WsMessage` match onto the spec's tagged `Frame` union, and from
//! raw-byte relay onto HTTP envelope forwarding.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunnel_protocol::Frame;

use crate::correlator::DispatchCorrelator;
use crate::http_forward::forward_to_local_service;
use crate::reverse_proxy;
use crate::supervisor::ClientWebSocket;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PINGS: u64 = 2;

pub struct HttpSessionConfig {
    pub tunnel_id: String,
    pub local_base_url: String,
    pub reverse_proxy_addr: Option<SocketAddr>,
}

/// Runs one HTTP-tunnel control-channel session to completion (§4.4).
/// Returns once the channel closes or errors; all per-session tasks
/// (outbound sender, heartbeat, optional reverse-proxy listener) and
/// pending reverse-proxy requests are torn down before returning, which
/// is this mode's `Draining` behavior (§4.6).
pub async fn run(ws: ClientWebSocket, config: HttpSessionConfig, http_client: reqwest::Client) {
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let session_cancel = CancellationToken::new();
    let correlator = Arc::new(DispatchCorrelator::new());

    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
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

    let pending_pings = Arc::new(AtomicU64::new(0));
    let heartbeat_task = {
        let outbound_tx = outbound_tx.clone();
        let pending_pings = pending_pings.clone();
        let cancel = session_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if pending_pings.fetch_add(1, Ordering::SeqCst) >= MAX_MISSED_PINGS {
                    warn!("missed {MAX_MISSED_PINGS} consecutive pings; ending session");
                    cancel.cancel();
                    break;
                }
                if outbound_tx.send(Frame::Ping).is_err() {
                    break;
                }
            }
        })
    };

    let reverse_proxy_task = config.reverse_proxy_addr.map(|addr| {
        let handle = reverse_proxy::ReverseProxyHandle {
            outbound: outbound_tx.clone(),
            correlator: correlator.clone(),
        };
        let cancel = session_cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = reverse_proxy::run(addr, handle, cancel).await {
                warn!("reverse-proxy listener on {addr} failed: {err}");
            }
        })
    });

    loop {
        tokio::select! {
            biased;
            _ = session_cancel.cancelled() => break,
            message = stream.next() => {
                let Some(message) = message else { break };
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        debug!("control channel read error: {err}");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        pending_pings.store(0, Ordering::SeqCst);
                        match tunnel_protocol::decode(&text) {
                            Ok(frame) => {
                                handle_frame(frame, &config, &http_client, &outbound_tx, &correlator).await;
                            }
                            Err(err) => debug!("dropping unparseable frame: {err}"),
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                }
            }
        }
    }

    info!("http session for tunnel '{}' ended", config.tunnel_id);
    heartbeat_task.abort();
    outbound_task.abort();
    if let Some(task) = reverse_proxy_task {
        task.abort();
    }
    correlator.drain(|request_id| {
        tunnel_protocol::HttpResponseEnvelope::synthetic_error(
            request_id.to_string(),
            503,
            "Service Unavailable",
            "the control channel disconnected before the dispatch response arrived",
        )
    });
}

async fn handle_frame(
    frame: Frame,
    config: &HttpSessionConfig,
    http_client: &reqwest::Client,
    outbound_tx: &mpsc::UnboundedSender<Frame>,
    correlator: &Arc<DispatchCorrelator>,
) {
    match frame {
        Frame::Ping => {
            let _ = outbound_tx.send(Frame::Pong);
        }
        Frame::Pong => {
            // pending_pings already reset on every inbound text frame.
        }
        Frame::HttpRequest(request) => {
            let http_client = http_client.clone();
            let local_base = config.local_base_url.clone();
            let tunnel_id = config.tunnel_id.clone();
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let response = forward_to_local_service(&http_client, &local_base, &tunnel_id, &request).await;
                let _ = outbound_tx.send(Frame::HttpResponse(response));
            });
        }
        Frame::Dispatch(request) => {
            // A cross-service request the server is asking *this* client
            // to fulfill against its own local service (§4.4 "If it is a
            // $dispatch$ sent from the server, perform the same
            // forwarding logic").
            let http_client = http_client.clone();
            let local_base = config.local_base_url.clone();
            let tunnel_id = config.tunnel_id.clone();
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let response = forward_to_local_service(&http_client, &local_base, &tunnel_id, &request).await;
                let _ = outbound_tx.send(Frame::DispatchResponse(response));
            });
        }
        Frame::DispatchResponse(response) => {
            // The reply to a `$dispatch$` *this* client originated via
            // its reverse-proxy listener (§4.4 second paragraph).
            if !correlator.complete(&response.request_id, response.clone()) {
                debug!("dispatch response for unknown or already-completed request '{}'", response.request_id);
            }
        }
        Frame::HttpResponse(_) => {
            debug!("received a bare HTTP response; only the client originates these");
        }
        Frame::WsRelay(_) => {
            debug!("websocket relay passthrough is not implemented on the client");
        }
        Frame::Tcp(_) => {
            debug!("received a TCP mux frame on an HTTP-mode control channel; ignoring");
        }
    }
}
