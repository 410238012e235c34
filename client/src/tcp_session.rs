//! TCP tunnel — client side (§4.5): on each `init`, dial the configured
//! local service and multiplex its bytes over the control channel;
//! mirror-image of `server::tcp_tunnel`.
//!
//! Grounded on the teacher's `relay.rs::handle_stream_relay` (a TCP
//! stream split into a read-half-to-channel task and a
//! channel-to-write-half task, torn down together) generalized from the
//! teacher's ad hoc `role`-tagged `Data` message onto the canonical
//! `init`/`data`/`close`/`error`/`control` `TcpFrame` vocabulary (§9
//! Design Notes (b): the explicit `init` path, not implicit-on-first-data).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use tunnel_protocol::{Frame, TcpEnvelope, TcpFrameKind};

use crate::supervisor::ClientWebSocket;

/// Chunk size for local-socket reads, matching the server's own §4.5
/// 8KiB granularity.
const READ_CHUNK: usize = 8 * 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct LocalStream {
    data_tx: mpsc::UnboundedSender<Vec<u8>>,
    reader_handle: JoinHandle<()>,
}

pub struct TcpSessionConfig {
    pub tunnel_id: String,
    pub local_host: String,
    pub local_port: u16,
}

/// Runs one TCP-tunnel control-channel session to completion (§4.5).
pub async fn run(ws: ClientWebSocket, config: TcpSessionConfig) {
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let streams: Arc<DashMap<String, LocalStream>> = Arc::new(DashMap::new());

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

    let heartbeat_task = {
        let outbound_tx = outbound_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if outbound_tx.send(Frame::Tcp(TcpEnvelope::heartbeat())).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!("control channel read error: {err}");
                break;
            }
        };
        match message {
            Message::Text(text) => match tunnel_protocol::decode(&text) {
                Ok(frame) => handle_frame(frame, &config, &outbound_tx, &streams).await,
                Err(err) => debug!("dropping unparseable frame: {err}"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    }

    info!("tcp session for tunnel '{}' ended", config.tunnel_id);
    heartbeat_task.abort();
    outbound_task.abort();
    for entry in streams.iter() {
        entry.value().reader_handle.abort();
    }
    streams.clear();
}

async fn handle_frame(
    frame: Frame,
    config: &TcpSessionConfig,
    outbound_tx: &mpsc::UnboundedSender<Frame>,
    streams: &Arc<DashMap<String, LocalStream>>,
) {
    match frame {
        Frame::Ping => {
            let _ = outbound_tx.send(Frame::Pong);
        }
        Frame::Pong => {}
        Frame::Tcp(envelope) => handle_tcp_envelope(envelope, config, outbound_tx, streams).await,
        Frame::HttpRequest(_) | Frame::HttpResponse(_) | Frame::Dispatch(_) | Frame::DispatchResponse(_) | Frame::WsRelay(_) => {
            debug!("received a non-TCP frame on a TCP-mode control channel; ignoring");
        }
    }
}

async fn handle_tcp_envelope(
    envelope: TcpEnvelope,
    config: &TcpSessionConfig,
    outbound_tx: &mpsc::UnboundedSender<Frame>,
    streams: &Arc<DashMap<String, LocalStream>>,
) {
    match envelope.kind {
        TcpFrameKind::Init => {
            let connection_id = envelope.connection_id;
            let addr = format!("{}:{}", config.local_host, config.local_port);
            match TcpStream::connect(&addr).await {
                Ok(socket) => {
                    let (mut read_half, mut write_half) = socket.into_split();
                    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<Vec<u8>>();

                    let writer_handle = tokio::spawn(async move {
                        while let Some(chunk) = data_rx.recv().await {
                            if write_half.write_all(&chunk).await.is_err() {
                                break;
                            }
                        }
                        let _ = write_half.shutdown().await;
                    });

                    let reader_outbound = outbound_tx.clone();
                    let reader_connection_id = connection_id.clone();
                    let reader_handle = tokio::spawn(async move {
                        let mut buf = vec![0u8; READ_CHUNK];
                        loop {
                            match read_half.read(&mut buf).await {
                                Ok(0) => {
                                    let _ = reader_outbound.send(Frame::Tcp(TcpEnvelope::close(reader_connection_id.clone())));
                                    break;
                                }
                                Ok(n) => {
                                    if reader_outbound
                                        .send(Frame::Tcp(TcpEnvelope::data(reader_connection_id.clone(), buf[..n].to_vec())))
                                        .is_err()
                                    {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    let _ = reader_outbound.send(Frame::Tcp(TcpEnvelope::error(reader_connection_id.clone(), err.to_string())));
                                    break;
                                }
                            }
                        }
                    });

                    // The writer task's demise (local socket closed) doesn't
                    // need separate tracking: dropping `data_tx` when the
                    // entry is removed ends it naturally.
                    drop(writer_handle);
                    streams.insert(connection_id, LocalStream { data_tx, reader_handle });
                }
                Err(err) => {
                    warn!("failed to dial local service {addr} for connection '{connection_id}': {err}");
                    let _ = outbound_tx.send(Frame::Tcp(TcpEnvelope::error(connection_id, err.to_string())));
                }
            }
        }
        TcpFrameKind::Data => {
            if let Some(stream) = streams.get(&envelope.connection_id) {
                if let Some(data) = envelope.data {
                    let _ = stream.data_tx.send(data);
                }
            } else {
                debug!("data for unknown connection '{}'", envelope.connection_id);
            }
        }
        TcpFrameKind::Close | TcpFrameKind::Error => {
            if let Some((_, stream)) = streams.remove(&envelope.connection_id) {
                stream.reader_handle.abort();
            }
        }
        TcpFrameKind::Control => {
            // Inbound control/heartbeat frames aren't expected on this
            // side; the client is the one that originates them (§4.5).
        }
    }
}
