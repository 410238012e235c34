//! HTTP tunnel — server side (§4.3).
//!
//! Public ingress (routing a public HTTP request to the right tunnel,
//! correlating its response, enforcing the 120s deadline) and the
//! `$dispatch$` sibling-forwarding path the control loop calls into.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::{debug, warn};
use tunnel_protocol::{Frame, HttpRequestEnvelope, HttpResponseEnvelope};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::state::AppState;

/// Requests routed through a tunnel get this long before the public
/// caller sees a 504 (§4.3, §5).
pub const SERVER_REQUEST_DEADLINE: Duration = Duration::from_secs(120);

/// `fallback` handler for every path not claimed by a reserved route
/// (`/tunnel`, `/$status`, `/api/...`). Implements §4.3's public-ingress
/// contract and §6's status-code table.
pub async fn public_ingress(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let single = state.registry.is_single_tunnel();
    let requested_id = first_path_segment(uri.path());

    if !single && requested_id.is_none() {
        return bad_request("request path must begin with /<tunnel-id>/");
    }

    let Some(tunnel) = state.registry.resolve_public(requested_id.as_deref()) else {
        return unknown_tunnel_response(requested_id.as_deref(), &state);
    };

    let full_url = full_url_for(&headers, &uri);
    let envelope = HttpRequestEnvelope {
        request_id: String::new(), // assigned below
        method: method.as_str().to_string(),
        url: full_url,
        headers: headers_to_map(&headers),
        body: body.to_vec(),
        is_web_socket_request: headers
            .get(axum::http::header::UPGRADE)
            .map(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"))
            .unwrap_or(false),
        is_blazor_request: false,
    };

    match dispatch_and_await(&tunnel, envelope, SERVER_REQUEST_DEADLINE, Frame::HttpRequest).await {
        Ok(resp) => {
            tunnel.record_completed_request();
            envelope_into_response(resp)
        }
        Err(IngressError::Disconnected) => service_unavailable("Tunnel Disconnected"),
        Err(IngressError::TimedOut) => gateway_timeout(),
        Err(IngressError::SendFailed) => service_unavailable("Tunnel Disconnected"),
    }
}

enum IngressError {
    Disconnected,
    TimedOut,
    SendFailed,
}

/// Sends `envelope` on `tunnel`'s control channel (assigning a fresh
/// request id, regenerating once on the vanishingly unlikely id
/// collision per §4.7) and awaits the correlated response under
/// `deadline`.
async fn dispatch_and_await(
    tunnel: &crate::state::TunnelRecord,
    mut envelope: HttpRequestEnvelope,
    deadline: Duration,
    wrap: impl FnOnce(HttpRequestEnvelope) -> Frame,
) -> Result<HttpResponseEnvelope, IngressError> {
    let mut request_id = Uuid::new_v4().to_string();
    let mut rx = match tunnel.correlator.insert(request_id.clone()) {
        Ok(rx) => rx,
        Err(_) => {
            // Fatal-invariant path per §4.7: regenerate once, then give up.
            request_id = Uuid::new_v4().to_string();
            match tunnel.correlator.insert(request_id.clone()) {
                Ok(rx) => rx,
                Err(err) => {
                    tracing::error!("request id collision could not be resolved: {err}");
                    return Err(IngressError::SendFailed);
                }
            }
        }
    };
    envelope.request_id = request_id.clone();

    if tunnel.send(wrap(envelope)).is_err() {
        tunnel.correlator.forget(&request_id);
        return Err(IngressError::SendFailed);
    }

    match timeout(deadline, &mut rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_recv_error)) => Err(IngressError::Disconnected),
        Err(_elapsed) => {
            tunnel.correlator.forget(&request_id);
            Err(IngressError::TimedOut)
        }
    }
}

/// `$dispatch$` handling (§4.3): forward a request to a sibling tunnel
/// named by the first path segment of its URL, replying with
/// `$dispatchresponse$` on the same channel that received the dispatch.
/// Never propagates an error across the control loop — any failure
/// becomes a synthetic 5xx envelope (Design Notes: "the forwarder
/// returns an envelope, never throws").
pub async fn forward_dispatch(state: &AppState, request: HttpRequestEnvelope) -> HttpResponseEnvelope {
    let request_id = request.request_id.clone();
    match forward_dispatch_inner(state, &request).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!("dispatch forward failed: {err}");
            HttpResponseEnvelope::synthetic_error(request_id, 502, "Bad Gateway", &err.to_string())
        }
    }
}

async fn forward_dispatch_inner(
    state: &AppState,
    request: &HttpRequestEnvelope,
) -> Result<HttpResponseEnvelope, DispatchError> {
    let sibling_id = sibling_id_from_url(&request.url).ok_or_else(|| DispatchError::MissingSiblingId(request.url.clone()))?;
    let sibling = state
        .registry
        .resolve_public(Some(&sibling_id))
        .ok_or_else(|| DispatchError::UnknownSibling(sibling_id.clone()))?;

    let forwarded = HttpRequestEnvelope {
        request_id: String::new(),
        method: request.method.clone(),
        url: request.url.clone(),
        headers: request.headers.clone(),
        body: request.body.clone(),
        is_web_socket_request: request.is_web_socket_request,
        is_blazor_request: request.is_blazor_request,
    };

    dispatch_and_await(&sibling, forwarded, SERVER_REQUEST_DEADLINE, Frame::HttpRequest)
        .await
        .map_err(|e| match e {
            IngressError::TimedOut => DispatchError::SiblingTimedOut(sibling_id.clone()),
            _ => DispatchError::SiblingDisconnected(sibling_id.clone()),
        })
}

fn sibling_id_from_url(url: &str) -> Option<String> {
    let path = url.splitn(2, "://").nth(1).and_then(|rest| rest.split_once('/')).map(|(_, p)| p).unwrap_or(url);
    first_path_segment(&format!("/{path}"))
}

fn first_path_segment(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    let seg = trimmed.split('/').next().unwrap_or("");
    if seg.is_empty() || seg.starts_with('$') {
        None
    } else {
        Some(seg.to_string())
    }
}

fn full_url_for(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path());
    format!("http://{host}{path_and_query}")
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
                continue; // Body::from sets this; a stale value would desync the framing.
            }
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
                map.insert(name, value);
            }
        }
    }
    response.body(Body::from(envelope.body)).unwrap_or_else(|err| {
        debug!("failed to build response: {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn bad_request(message: &str) -> Response {
    json_error(StatusCode::BAD_REQUEST, "Bad Request", message)
}

fn gateway_timeout() -> Response {
    json_error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout", "the client did not respond within 120 seconds")
}

fn service_unavailable(message: &str) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable", message)
}

fn unknown_tunnel_response(requested_id: Option<&str>, state: &AppState) -> Response {
    let available = state.registry.ids();
    let body = serde_json::json!({
        "error": "Not Found",
        "message": format!("no tunnel registered for id '{}'", requested_id.unwrap_or("")),
        "requestedId": requested_id,
        "availableTunnels": available,
    });
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

fn json_error(status: StatusCode, error: &str, message: &str) -> Response {
    let body = serde_json::json!({ "error": error, "message": message });
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_path_segment_extracts_the_tunnel_id() {
        assert_eq!(first_path_segment("/svc1/echo"), Some("svc1".to_string()));
        assert_eq!(first_path_segment("/svc1"), Some("svc1".to_string()));
        assert_eq!(first_path_segment("/"), None);
        assert_eq!(first_path_segment("/$status"), None);
    }

    #[test]
    fn sibling_id_from_url_reads_the_first_path_segment() {
        assert_eq!(sibling_id_from_url("http://host/sibling/path?x=1"), Some("sibling".to_string()));
        assert_eq!(sibling_id_from_url("/sibling/path"), Some("sibling".to_string()));
    }
}
