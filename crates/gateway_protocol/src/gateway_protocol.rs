//! # Gateway Protocol
//!
//! JSON frame definitions for talking to an agent gateway over a WebSocket.
//! Covers the request/response envelope, server-pushed events, the
//! `connect` handshake parameters, and the canonical string a device signs
//! during the handshake.

pub mod connect;
pub mod events;
pub mod frames;

pub use connect::{
    ClientInfo, ConnectAuth, ConnectChallenge, ConnectParams, DeviceBlock, HelloAuth, HelloOk,
    SignedPayload,
};
pub use events::{LifecycleEvent, LifecyclePhase};
pub use frames::{
    ErrorShape, EventFrame, FrameError, GatewayFrame, Inbound, RequestFrame, ResponseFrame,
};

/// Protocol version spoken by this client. Sent as both bounds of the range.
pub const PROTOCOL_VERSION: u32 = 3;

/// Default gateway port
pub const DEFAULT_PORT: u16 = 18789;

/// Method name of the authentication call.
pub const CONNECT_METHOD: &str = "connect";

/// Event names the client routes on.
pub mod event_names {
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    pub const AGENT: &str = "agent";
}

pub mod roles {
    pub const OPERATOR: &str = "operator";
    pub const NODE: &str = "node";
}

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
}
