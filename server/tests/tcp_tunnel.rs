//! End-to-end TCP-tunnel scenarios: a public TCP connection relayed
//! through a fake client's control channel, and the single-client
//! constraint on a second simultaneous TCP tunnel registration.

mod common;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tunnel_protocol::{Frame, TcpEnvelope, TcpFrameKind};

#[tokio::test]
async fn a_public_tcp_connection_is_relayed_end_to_end() {
    let tcp_port = common::free_tcp_port().await;
    let server = common::spawn_with_tcp(tcp_port).await;
    let mut client = common::FakeClient::connect(&server.ws_url("tcp1", "tcp")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let tcp_addr = std::net::SocketAddr::from(([127, 0, 0, 1], tcp_port));
    let mut public_socket = TcpStream::connect(tcp_addr).await.unwrap();
    public_socket.write_all(b"ping").await.unwrap();

    // The server announces the new sub-stream with an Init frame before
    // any bytes flow.
    let connection_id = match client.recv().await {
        Some(Frame::Tcp(TcpEnvelope { kind: TcpFrameKind::Init, connection_id, .. })) => connection_id,
        other => panic!("expected a TCP Init frame, got {other:?}"),
    };

    let data = match client.recv().await {
        Some(Frame::Tcp(TcpEnvelope { kind: TcpFrameKind::Data, data: Some(data), .. })) => data,
        other => panic!("expected a TCP Data frame, got {other:?}"),
    };
    assert_eq!(data, b"ping");

    client.send(Frame::Tcp(TcpEnvelope::data(connection_id.clone(), b"pong".to_vec()))).await;

    let mut buf = [0u8; 4];
    public_socket.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    public_socket.shutdown().await.unwrap();
    match client.recv().await {
        Some(Frame::Tcp(TcpEnvelope { kind: TcpFrameKind::Close, connection_id: closed_id, .. })) => {
            assert_eq!(closed_id, connection_id);
        }
        other => panic!("expected a TCP Close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn a_tcp_connection_with_no_registered_tunnel_is_dropped() {
    let tcp_port = common::free_tcp_port().await;
    let server = common::spawn_with_tcp(tcp_port).await;
    let _keep_alive = &server; // keep the listener task alive for the test's duration

    let tcp_addr = std::net::SocketAddr::from(([127, 0, 0, 1], tcp_port));
    let mut public_socket = TcpStream::connect(tcp_addr).await.unwrap();
    public_socket.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 1];
    let read = public_socket.read(&mut buf).await.unwrap();
    assert_eq!(read, 0, "the server should close the connection with no tunnel registered");
}

#[tokio::test]
async fn a_second_simultaneous_tcp_tunnel_is_rejected() {
    let server = common::spawn_default().await;
    let _first = common::FakeClient::connect(&server.ws_url("tcp-a", "tcp")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut second = common::FakeClient::connect(&server.ws_url("tcp-b", "tcp")).await;
    assert!(second.recv().await.is_none());
}
