//! Shared integration-test scaffolding: binds the real router to an
//! ephemeral port and drives the control channel the way a client would.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tunnel_protocol::Frame;
use tunnel_server::config::AppConfig;
use tunnel_server::state::AppState;

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Starts a server on a loopback ephemeral port with the given config
    /// overrides already applied to `config`.
    pub async fn spawn(config: AppConfig) -> Self {
        let state = AppState::new(config);
        let app = tunnel_server::build_router(state.clone());
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, _handle: handle }
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, tunnel_id: &str, kind: &str) -> String {
        format!("ws://{}/tunnel?id={tunnel_id}&kind={kind}", self.addr)
    }
}

fn default_config() -> AppConfig {
    <AppConfig as clap::Parser>::parse_from(["start-server"])
}

pub async fn spawn_default() -> TestServer {
    TestServer::spawn(default_config()).await
}

pub async fn spawn_single_tunnel() -> TestServer {
    let config = <AppConfig as clap::Parser>::parse_from(["start-server", "--singleTunnel"]);
    TestServer::spawn(config).await
}

pub async fn spawn_with_tcp(tcp_port: u16) -> TestServer {
    let config = <AppConfig as clap::Parser>::parse_from(["start-server", "--tcpPort", &tcp_port.to_string()]);
    TestServer::spawn(config).await
}

pub async fn spawn_with_auth_hook(hook: tunnel_server::state::AuthHook) -> TestServer {
    let state = AppState::new(default_config()).with_auth_hook(hook);
    let app = tunnel_server::build_router(state.clone());
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, state, _handle: handle }
}

/// A minimal fake client: connects the control-channel upgrade and
/// exposes `send`/`recv` over decoded [`Frame`]s.
pub struct FakeClient {
    ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

impl FakeClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await.unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, frame: Frame) {
        let text = tunnel_protocol::encode(&frame).unwrap();
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let message = self.ws.next().await?.ok()?;
            match message {
                Message::Text(text) => return tunnel_protocol::decode(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Finds a free loopback TCP port by binding to port 0 and releasing it.
pub async fn free_tcp_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}
