//! Wire protocol shared between the relay server and the tunnel client.
//!
//! Keeping this in its own crate means the server and client can never
//! drift on envelope shape the way the teacher's two hand-duplicated
//! `protocol.rs` copies could.

pub mod base64_bytes;
pub mod envelope;
pub mod frame;

pub use envelope::{HttpRequestEnvelope, HttpResponseEnvelope, TcpEnvelope, TcpFrameKind, WsRelayFrame};
pub use frame::{decode, encode, Frame, FrameError};
