//! TCP tunnel — server side (§4.5): the public raw-TCP listener and the
//! per-connection plumbing that multiplexes bytes over the owning
//! tunnel's control channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use tunnel_protocol::{Frame, TcpEnvelope};
use uuid::Uuid;

use crate::state::{AppState, TcpStreamHandle};

/// Chunk size for reads off the public socket (§4.5 "8KiB read chunks").
const READ_CHUNK: usize = 8 * 1024;

/// Runs the public TCP listener for the lifetime of the server. Exits
/// only if `bind` itself fails; once bound, per-connection errors are
/// logged and the listener keeps accepting.
pub async fn run_tcp_listener(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("public TCP listener bound to {addr}");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("tcp accept failed: {err}");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            handle_public_connection(socket, peer, state).await;
        });
    }
}

async fn handle_public_connection(socket: TcpStream, peer: SocketAddr, state: AppState) {
    // The sole TCP tunnel, if any: TCP mode admits at most one client at a
    // time (§4.5 "single-client-at-a-time constraint").
    let Some(tunnel) = state.registry.resolve_public(None).filter(|t| t.kind == crate::state::TunnelKind::Tcp) else {
        debug!("rejecting tcp connection from {peer}: no tcp tunnel registered");
        return;
    };

    let connection_id = Uuid::new_v4().to_string();
    let (read_half, write_half) = socket.into_split();
    let (data_tx, data_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_handle = tokio::spawn(drain_to_socket(write_half, data_rx));
    let tunnel_for_reader = tunnel.clone();
    let connection_id_for_reader = connection_id.clone();
    let reader_handle = tokio::spawn(async move {
        read_from_socket(read_half, tunnel_for_reader, connection_id_for_reader).await;
    });

    tunnel.tcp_streams.insert(
        connection_id.clone(),
        TcpStreamHandle {
            data_tx,
            last_activity: AsyncMutex::new(Instant::now()),
            reader_handle,
        },
    );

    let _ = tunnel.send(Frame::Tcp(TcpEnvelope::init(connection_id.clone(), peer.ip().to_string(), peer.port())));
    // Keep the writer task anchored to this function's scope; its demise
    // (socket closed, channel dropped) naturally ends the connection.
    let _ = writer_handle.await;
    if let Some((_, stream)) = tunnel.tcp_streams.remove(&connection_id) {
        stream.reader_handle.abort();
    }
    let _ = tunnel.send(Frame::Tcp(TcpEnvelope::close(connection_id)));
}

async fn drain_to_socket(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut data_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = data_rx.recv().await {
        if write_half.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn read_from_socket(mut read_half: tokio::net::tcp::OwnedReadHalf, tunnel: Arc<crate::state::TunnelRecord>, connection_id: String) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                let _ = tunnel.send(Frame::Tcp(TcpEnvelope::close(connection_id.clone())));
                break;
            }
            Ok(n) => {
                if tunnel.send(Frame::Tcp(TcpEnvelope::data(connection_id.clone(), buf[..n].to_vec()))).is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = tunnel.send(Frame::Tcp(TcpEnvelope::error(connection_id.clone(), err.to_string())));
                break;
            }
        }
    }
}
