//! Typed errors at component boundaries (§7). The teacher mostly
//! swallows send errors with `let _ =` and `.unwrap()`s its listener
//! binds; the spec's error-handling design calls for explicit result
//! values instead, so boundary-crossing failures are typed here.

use thiserror::Error;

/// Errors from [`crate::state::TunnelRegistry`] operations (§4.2, §7 "Route").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tunnel id '{0}' is already in use")]
    IdInUse(String),
    #[error("single-tunnel mode already has a registered tunnel")]
    SingleTunnelOccupied,
    #[error("a TCP-mode control channel is already connected")]
    TcpConflict,
    #[error("no tunnel registered for id '{0}'")]
    NotFound(String),
}

/// Errors surfaced while forwarding a dispatch request to a sibling
/// tunnel (§4.3). Never propagated as a panic across the control loop —
/// callers convert these into a synthetic 5xx [`tunnel_protocol::HttpResponseEnvelope`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch url '{0}' has no path segment identifying a sibling tunnel")]
    MissingSiblingId(String),
    #[error("no tunnel registered for sibling service '{0}'")]
    UnknownSibling(String),
    #[error("sibling tunnel '{0}' disconnected before responding")]
    SiblingDisconnected(String),
    #[error("sibling tunnel '{0}' did not respond within the deadline")]
    SiblingTimedOut(String),
}
