//! HTTP tunnel — client side (§4.4): forward a request envelope to the
//! configured local HTTP service and build the reply envelope.

use std::time::Duration;

use tunnel_protocol::{HttpRequestEnvelope, HttpResponseEnvelope};
use url::Url;

/// Headers stripped before reissuing a request locally or a response
/// upstream (§8 "hop-by-hop headers").
const HOP_BY_HOP: &[&str] = &["host", "connection", "content-length"];

const LOCAL_CALL_DEADLINE: Duration = Duration::from_secs(60);

/// Forwards `request` to `local_base` and returns the response envelope,
/// synthesizing a 502/504 envelope on any local-call failure rather than
/// propagating an error to the caller (§9 "the forwarder returns an
/// envelope, never throws").
pub async fn forward_to_local_service(
    client: &reqwest::Client,
    local_base: &str,
    tunnel_id: &str,
    request: &HttpRequestEnvelope,
) -> HttpResponseEnvelope {
    match forward_inner(client, local_base, tunnel_id, request).await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            HttpResponseEnvelope::synthetic_error(request.request_id.clone(), 504, "Gateway Timeout", &err.to_string())
        }
        Err(err) => HttpResponseEnvelope::synthetic_error(request.request_id.clone(), 502, "Bad Gateway", &err.to_string()),
    }
}

async fn forward_inner(
    client: &reqwest::Client,
    local_base: &str,
    tunnel_id: &str,
    request: &HttpRequestEnvelope,
) -> Result<HttpResponseEnvelope, reqwest::Error> {
    let local_url = build_local_url(local_base, tunnel_id, &request.url);
    let method = reqwest::Method::from_bytes(request.method.as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut builder = client.request(method, local_url).timeout(LOCAL_CALL_DEADLINE);
    for (name, value) in &request.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;
    let status_code = response.status().as_u16();
    let mut headers = std::collections::HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            if !is_hop_by_hop(name.as_str()) {
                headers.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }
    }
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponseEnvelope {
        request_id: request.request_id.clone(),
        status_code,
        headers,
        body,
        error_message: None,
    })
}

fn is_hop_by_hop(name: &str) -> bool {
    name.starts_with(':') || HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Joins `local_base` with the path+query derived from the original
/// public URL, stripping the leading `/<tunnel-id>/` segment if present
/// (§4.3 "the client re-derives the local path").
fn build_local_url(local_base: &str, tunnel_id: &str, original_url: &str) -> String {
    let path_and_query = Url::parse(original_url)
        .map(|u| format!("{}{}", u.path(), u.query().map(|q| format!("?{q}")).unwrap_or_default()))
        .unwrap_or_else(|_| original_url.to_string());
    let stripped = strip_tunnel_prefix(&path_and_query, tunnel_id);
    format!("{}{}", local_base.trim_end_matches('/'), stripped)
}

fn strip_tunnel_prefix<'a>(path: &'a str, tunnel_id: &str) -> &'a str {
    let without_slash = format!("/{tunnel_id}");
    match path.strip_prefix(&without_slash) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => {
            if rest.is_empty() {
                "/"
            } else if let Some(stripped) = rest.strip_prefix('/') {
                if stripped.is_empty() { "/" } else { rest }
            } else {
                rest
            }
        }
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_local_url_strips_tunnel_prefix_and_keeps_query() {
        let url = build_local_url("http://127.0.0.1:5000", "svc1", "http://host/svc1/echo?x=1");
        assert_eq!(url, "http://127.0.0.1:5000/echo?x=1");
    }

    #[test]
    fn build_local_url_leaves_non_matching_path_untouched() {
        let url = build_local_url("http://127.0.0.1:5000", "svc1", "http://host/other/echo");
        assert_eq!(url, "http://127.0.0.1:5000/other/echo");
    }

    #[test]
    fn is_hop_by_hop_matches_case_insensitively_and_colon_prefixed() {
        assert!(is_hop_by_hop("Host"));
        assert!(is_hop_by_hop("Content-Length"));
        assert!(is_hop_by_hop(":authority"));
        assert!(!is_hop_by_hop("x-request-id"));
    }
}
