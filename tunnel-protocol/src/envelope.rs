//! The JSON envelope shapes carried inside control-channel frames (§3, §6).
//!
//! Field names are camelCase on the wire, matching the "Frame formats"
//! section of the spec. Bodies are always carried as base64 bytes (the
//! byte-body wire variant); the legacy string-body variant mentioned in
//! the design notes is not emitted or accepted — see DESIGN.md.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A public HTTP request forwarded from the server to a client for local
/// dispatch, or a dispatch request forwarded between sibling tunnels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestEnvelope {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(with = "crate::base64_bytes", default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub is_web_socket_request: bool,
    #[serde(default)]
    pub is_blazor_request: bool,
}

/// The reply to an [`HttpRequestEnvelope`], correlated by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseEnvelope {
    pub request_id: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(with = "crate::base64_bytes", default)]
    pub body: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HttpResponseEnvelope {
    /// Builds a synthetic error response for timeouts, disconnects, and
    /// upstream failures — the shape user-visible failure bodies take
    /// per §7 ("JSON `{error, message, ...}`").
    pub fn synthetic_error(request_id: impl Into<String>, status: u16, error: &str, message: &str) -> Self {
        let body = serde_json::json!({ "error": error, "message": message }).to_string();
        Self {
            request_id: request_id.into(),
            status_code: status,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: body.into_bytes(),
            error_message: Some(message.to_string()),
        }
    }
}

/// One chunk of a multiplexed TCP sub-stream (§3 "TCP envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpEnvelope {
    #[serde(rename = "type")]
    pub kind: TcpFrameKind,
    pub connection_id: String,
    #[serde(default, with = "crate::base64_bytes::option", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TcpEnvelope {
    pub fn init(connection_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TcpFrameKind::Init,
            connection_id: connection_id.into(),
            data: None,
            host: Some(host.into()),
            port: Some(port),
            error: None,
        }
    }

    pub fn data(connection_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: TcpFrameKind::Data,
            connection_id: connection_id.into(),
            data: Some(payload),
            host: None,
            port: None,
            error: None,
        }
    }

    pub fn close(connection_id: impl Into<String>) -> Self {
        Self {
            kind: TcpFrameKind::Close,
            connection_id: connection_id.into(),
            data: None,
            host: None,
            port: None,
            error: None,
        }
    }

    pub fn error(connection_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TcpFrameKind::Error,
            connection_id: connection_id.into(),
            data: None,
            host: None,
            port: None,
            error: Some(message.into()),
        }
    }

    /// The client-side heartbeat: `{type:"control", connectionId:"heartbeat"}` (§4.5).
    pub fn heartbeat() -> Self {
        Self {
            kind: TcpFrameKind::Control,
            connection_id: "heartbeat".to_string(),
            data: None,
            host: None,
            port: None,
            error: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == TcpFrameKind::Control && self.connection_id == "heartbeat"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpFrameKind {
    Init,
    Data,
    Close,
    Error,
    Control,
}

/// Relayed WebSocket data chunk carried inside a `$wsrelay$` frame
/// (§4.1). Bidirectional passthrough itself is optional (§9c); this
/// type exists so a relayed chunk can still be forwarded end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsRelayFrame {
    pub connection_id: String,
    #[serde(default, with = "crate::base64_bytes::option", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub closed: bool,
}
