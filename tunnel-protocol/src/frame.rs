//! The control-channel frame codec (§4.1).
//!
//! A frame is either a single-line prefix marker, a prefixed JSON
//! envelope, or a bare JSON object disambiguated by its key set. This
//! module owns that disambiguation so the rest of the codebase matches
//! on the [`Frame`] enum instead of re-deriving the prefix scheme.

use crate::envelope::{HttpRequestEnvelope, HttpResponseEnvelope, TcpEnvelope, WsRelayFrame};

const PING: &str = "$ping$";
const PONG: &str = "$pong$";
const DISPATCH: &str = "$dispatch$";
const DISPATCH_RESPONSE: &str = "$dispatchresponse$";
const WS_RELAY: &str = "$wsrelay$";

/// The single tagged union Design Notes asks for in place of ad hoc
/// dynamic dispatch on envelope shape.
#[derive(Debug, Clone)]
pub enum Frame {
    Ping,
    Pong,
    /// A request forwarded from the server to a client for cross-service
    /// dispatch (server→client).
    Dispatch(HttpRequestEnvelope),
    /// The reply to a [`Frame::Dispatch`] (client→server).
    DispatchResponse(HttpResponseEnvelope),
    /// A relayed WebSocket data chunk (bidirectional, optional feature).
    WsRelay(WsRelayFrame),
    /// A public HTTP request forwarded to the client (server→client).
    HttpRequest(HttpRequestEnvelope),
    /// The reply to a public HTTP request (client→server).
    HttpResponse(HttpResponseEnvelope),
    /// A TCP mux frame (bidirectional).
    Tcp(TcpEnvelope),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed JSON in frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame body does not match any known envelope shape")]
    UnknownShape,
}

/// Serializes a [`Frame`] to the text that goes out on the wire.
pub fn encode(frame: &Frame) -> Result<String, FrameError> {
    Ok(match frame {
        Frame::Ping => PING.to_string(),
        Frame::Pong => PONG.to_string(),
        Frame::Dispatch(env) => format!("{DISPATCH}{}", serde_json::to_string(env)?),
        Frame::DispatchResponse(env) => format!("{DISPATCH_RESPONSE}{}", serde_json::to_string(env)?),
        Frame::WsRelay(env) => format!("{WS_RELAY}{}", serde_json::to_string(env)?),
        Frame::HttpRequest(env) => serde_json::to_string(env)?,
        Frame::HttpResponse(env) => serde_json::to_string(env)?,
        Frame::Tcp(env) => serde_json::to_string(env)?,
    })
}

/// Parses a text frame received on the control channel. Never panics on
/// malformed input — the processing loop is expected to log and discard
/// on `Err` per §7 ("Protocol: malformed frame ... log, discard, continue").
pub fn decode(text: &str) -> Result<Frame, FrameError> {
    let text = text.trim();
    if text == PING {
        return Ok(Frame::Ping);
    }
    if text == PONG {
        return Ok(Frame::Pong);
    }
    if let Some(rest) = text.strip_prefix(DISPATCH_RESPONSE) {
        return Ok(Frame::DispatchResponse(serde_json::from_str(rest)?));
    }
    if let Some(rest) = text.strip_prefix(DISPATCH) {
        return Ok(Frame::Dispatch(serde_json::from_str(rest)?));
    }
    if let Some(rest) = text.strip_prefix(WS_RELAY) {
        return Ok(Frame::WsRelay(serde_json::from_str(rest)?));
    }

    // Bare JSON: disambiguate by key set per §4.1.
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").is_some() {
        return Ok(Frame::Tcp(serde_json::from_value(value)?));
    }
    if value.get("method").is_some() {
        return Ok(Frame::HttpRequest(serde_json::from_value(value)?));
    }
    if value.get("statusCode").is_some() {
        return Ok(Frame::HttpResponse(serde_json::from_value(value)?));
    }
    Err(FrameError::UnknownShape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ping_pong_round_trip() {
        assert!(matches!(decode(&encode(&Frame::Ping).unwrap()).unwrap(), Frame::Ping));
        assert!(matches!(decode(&encode(&Frame::Pong).unwrap()).unwrap(), Frame::Pong));
    }

    #[test]
    fn dispatch_and_dispatch_response_use_distinct_prefixes() {
        let req = HttpRequestEnvelope {
            request_id: "r1".into(),
            method: "GET".into(),
            url: "http://sibling/svc/path".into(),
            headers: HashMap::new(),
            body: Vec::new(),
            is_web_socket_request: false,
            is_blazor_request: false,
        };
        let encoded = encode(&Frame::Dispatch(req.clone())).unwrap();
        assert!(encoded.starts_with("$dispatch$"));
        assert!(!encoded.starts_with("$dispatchresponse$"));
        match decode(&encoded).unwrap() {
            Frame::Dispatch(back) => assert_eq!(back.request_id, req.request_id),
            other => panic!("expected Dispatch, got {other:?}"),
        }

        let resp = HttpResponseEnvelope {
            request_id: "r1".into(),
            status_code: 200,
            headers: HashMap::new(),
            body: Vec::new(),
            error_message: None,
        };
        let encoded = encode(&Frame::DispatchResponse(resp)).unwrap();
        assert!(encoded.starts_with("$dispatchresponse$"));
        assert!(matches!(decode(&encoded).unwrap(), Frame::DispatchResponse(_)));
    }

    #[test]
    fn bare_json_disambiguates_by_key_set() {
        let tcp = TcpEnvelope::data("c1", vec![9, 9]);
        let encoded = encode(&Frame::Tcp(tcp)).unwrap();
        assert!(matches!(decode(&encoded).unwrap(), Frame::Tcp(_)));

        let http_req = HttpRequestEnvelope {
            request_id: "r2".into(),
            method: "GET".into(),
            url: "http://x/".into(),
            headers: HashMap::new(),
            body: Vec::new(),
            is_web_socket_request: false,
            is_blazor_request: false,
        };
        let encoded = encode(&Frame::HttpRequest(http_req)).unwrap();
        assert!(matches!(decode(&encoded).unwrap(), Frame::HttpRequest(_)));

        let http_resp = HttpResponseEnvelope {
            request_id: "r2".into(),
            status_code: 200,
            headers: HashMap::new(),
            body: Vec::new(),
            error_message: None,
        };
        let encoded = encode(&Frame::HttpResponse(http_resp)).unwrap();
        assert!(matches!(decode(&encoded).unwrap(), Frame::HttpResponse(_)));
    }

    #[test]
    fn unknown_shape_is_an_error_not_a_panic() {
        assert!(decode("{\"nonsense\":true}").is_err());
        assert!(decode("not json at all").is_err());
    }
}
