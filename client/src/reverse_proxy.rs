//! The client's optional reverse-proxy listener (§4.4 second paragraph):
//! a local HTTP listener whose incoming requests are wrapped as
//! `$dispatch$` frames, sent to the server, and whose eventual
//! `$dispatchresponse$` is matched back by request id and written to
//! the original local caller.
//!
//! Grounded on the server's own public-ingress/correlator pairing
//! (`server::http_tunnel::public_ingress` + `dispatch_and_await`) — the
//! client-side mirror of the same insert/send/await-with-deadline shape,
//! using `axum` for symmetry with the server's listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{body::Body, Router};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tunnel_protocol::{Frame, HttpRequestEnvelope, HttpResponseEnvelope};
use uuid::Uuid;

use crate::correlator::DispatchCorrelator;

/// Round-trip budget for a reverse-proxy request: server round-trip plus
/// whatever the sibling tunnel's own 120s server-side deadline allows.
const DISPATCH_DEADLINE: Duration = Duration::from_secs(130);

#[derive(Clone)]
pub struct ReverseProxyHandle {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub correlator: Arc<DispatchCorrelator>,
}

pub async fn run(addr: SocketAddr, handle: ReverseProxyHandle, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = Router::new().fallback(dispatch_request).with_state(handle);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("reverse-proxy listener bound to {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn dispatch_request(
    State(handle): State<ReverseProxyHandle>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let rx = match handle.correlator.insert(request_id.clone()) {
        Ok(rx) => rx,
        Err(err) => return bad_gateway(&err.to_string()),
    };

    let envelope = HttpRequestEnvelope {
        request_id: request_id.clone(),
        method: method.as_str().to_string(),
        url: format!("http://reverse-proxy{}", uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path())),
        headers: headers_to_map(&headers),
        body: body.to_vec(),
        is_web_socket_request: false,
        is_blazor_request: false,
    };

    if handle.outbound.send(Frame::Dispatch(envelope)).is_err() {
        handle.correlator.forget(&request_id);
        return bad_gateway("control channel to the relay server is closed");
    }

    match timeout(DISPATCH_DEADLINE, rx).await {
        Ok(Ok(response)) => envelope_into_response(response),
        Ok(Err(_)) => bad_gateway("the relay server disconnected before responding"),
        Err(_) => {
            handle.correlator.forget(&request_id);
            (StatusCode::GATEWAY_TIMEOUT, "dispatch timed out").into_response()
        }
    }
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    map
}

fn envelope_into_response(envelope: HttpResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    if let Some(map) = response.headers_mut() {
        for (name, value) in envelope.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
                map.insert(name, value);
            }
        }
    }
    response.body(Body::from(envelope.body)).unwrap_or_else(|err| {
        debug!("failed to build reverse-proxy response: {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn bad_gateway(message: &str) -> Response {
    let body = serde_json::json!({ "error": "Bad Gateway", "message": message });
    (StatusCode::BAD_GATEWAY, axum::Json(body)).into_response()
}
