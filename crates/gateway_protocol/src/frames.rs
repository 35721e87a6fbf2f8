//! Frame envelope for the gateway protocol.
//!
//! Every WebSocket text message is one JSON object discriminated by `type`:
//!
//! ```text
//! {"type":"req",   "id":"0", "method":"connect", "params":{...}}
//! {"type":"res",   "id":"0", "ok":true, "payload":{...}}
//! {"type":"event", "event":"connect.challenge", "data":{"nonce":"..."}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connect::ConnectChallenge;
use crate::event_names;
use crate::events::LifecycleEvent;

/// Discriminated union of all frame types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrame),
    #[serde(rename = "res")]
    Response(ResponseFrame),
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// Client to gateway RPC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Gateway to client RPC result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Gateway to client server-push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, alias = "payload")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Error detail carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(
        rename = "retryAfterMs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_after_ms: Option<u64>,
}

/// Frame decoding errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {event} event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("malformed connect response: {0}")]
    MalformedHello(String),
}

/// A decoded inbound frame, classified by the component that consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `connect.challenge` event, consumed by the handshake.
    Challenge(ConnectChallenge),
    /// Response to a call, consumed by the correlation table.
    Response(ResponseFrame),
    /// `agent` lifecycle event, consumed by the completion waiter.
    Lifecycle(LifecycleEvent),
    /// Any other server-push event.
    Event(EventFrame),
    /// Server-initiated request. This client does not serve any methods.
    Request(RequestFrame),
}

impl GatewayFrame {
    pub fn to_text(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Encode as a complete `{"type":"req",...}` text frame.
    pub fn to_text(&self) -> Result<String, FrameError> {
        GatewayFrame::Request(self.clone()).to_text()
    }
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Split into the success payload or the gateway's error detail.
    ///
    /// A successful response without a payload yields JSON `null`. A failed
    /// response without an error object yields a synthetic `UNKNOWN` error so
    /// the caller still gets a rejection.
    pub fn into_result(self) -> Result<Value, ErrorShape> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ErrorShape::new("UNKNOWN", "request failed")))
        }
    }
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            seq: None,
        }
    }
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    /// Whether the gateway rejected a device token that no longer matches
    /// the device it was issued to.
    pub fn is_stale_device_token(&self) -> bool {
        if matches!(
            self.code.as_str(),
            error_codes::DEVICE_TOKEN_MISMATCH | error_codes::DEVICE_TOKEN_INVALID
        ) {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        message.contains("device token")
            && ["mismatch", "stale", "invalid", "revoked", "expired"]
                .iter()
                .any(|needle| message.contains(needle))
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (true, _) => write!(f, "{}", self.message),
            (false, true) => write!(f, "{}", self.code),
            (false, false) => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl Inbound {
    /// Parse one text frame and classify it.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: GatewayFrame = serde_json::from_str(text)?;
        Ok(match frame {
            GatewayFrame::Request(request) => Inbound::Request(request),
            GatewayFrame::Response(response) => Inbound::Response(response),
            GatewayFrame::Event(event) => match event.event.as_str() {
                event_names::CONNECT_CHALLENGE => {
                    let challenge = serde_json::from_value::<ConnectChallenge>(event.data)
                        .map_err(|e| FrameError::MalformedEvent {
                            event: event_names::CONNECT_CHALLENGE.into(),
                            reason: e.to_string(),
                        })?;
                    Inbound::Challenge(challenge)
                }
                event_names::AGENT => match LifecycleEvent::from_agent_data(&event.data)? {
                    Some(lifecycle) => Inbound::Lifecycle(lifecycle),
                    None => Inbound::Event(event),
                },
                _ => Inbound::Event(event),
            },
        })
    }
}

/// Error codes the client reacts to.
pub mod error_codes {
    pub const DEVICE_TOKEN_MISMATCH: &str = "DEVICE_TOKEN_MISMATCH";
    pub const DEVICE_TOKEN_INVALID: &str = "DEVICE_TOKEN_INVALID";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const TIMEOUT: &str = "TIMEOUT";
}
