//! Connect handshake payloads.
//!
//! ```text
//! Client                                        Gateway
//!   |                                              |
//!   |  <-- event connect.challenge { nonce } ----- |
//!   |                                              |
//!   |  -- req connect { client, role, scopes,  --> |
//!   |        device { id, publicKey, signature,    |
//!   |                 signedAt }, auth { token } } |
//!   |                                              |
//!   |  <-- res { ok, payload: hello-ok }  -------- |
//!   |      OR res { ok: false, error }             |
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PROTOCOL_VERSION;
use crate::frames::FrameError;

/// Version tag prefixed to the signed payload.
pub const SIGNED_PAYLOAD_VERSION: &str = "v1";

/// Nonce-bearing event that precedes any authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectChallenge {
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Client descriptor. `id`, `version`, `platform` and `mode` are required by
/// the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Proof of possession of the device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBlock {
    pub id: String,
    /// Raw 32-byte public key, base64url without padding.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Signature over [`SignedPayload`], base64url without padding.
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Successful `connect` payload. Only the fields the client acts on are
/// typed; the rest is kept opaque.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HelloOk {
    #[serde(default)]
    pub protocol: Option<u32>,
    #[serde(default)]
    pub server: Option<Value>,
    #[serde(default)]
    pub auth: Option<HelloAuth>,
}

/// Device token issued by the gateway for this identity and role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelloAuth {
    #[serde(rename = "deviceToken")]
    pub device_token: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(rename = "issuedAtMs", default)]
    pub issued_at_ms: Option<u64>,
}

/// The fields a device signs during `connect`.
///
/// The canonical form is the pipe-joined sequence
/// `v1|deviceId|clientId|clientMode|role|scopes|signedAtMs|token`, with scopes
/// comma-joined in the order they are requested. The gateway rebuilds the same
/// string to verify the signature, so order and separators are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub token: Option<&'a str>,
}

impl SignedPayload<'_> {
    pub fn to_canonical_string(&self) -> String {
        let scopes = self.scopes.join(",");
        let signed_at = self.signed_at_ms.to_string();
        [
            SIGNED_PAYLOAD_VERSION,
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or(""),
        ]
        .join("|")
    }
}

impl ConnectParams {
    pub fn new(client: ClientInfo, role: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            role: role.into(),
            scopes,
            caps: Vec::new(),
            device: None,
            auth: None,
            locale: None,
            user_agent: None,
        }
    }

    pub fn with_device(mut self, device: DeviceBlock) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth = token.map(|token| ConnectAuth { token: Some(token) });
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn to_value(&self) -> Result<Value, FrameError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl HelloOk {
    pub fn from_payload(payload: &Value) -> Result<Self, FrameError> {
        if !payload.is_object() {
            return Err(FrameError::MalformedHello(format!(
                "expected an object, got {payload}"
            )));
        }
        HelloOk::deserialize(payload).map_err(|e| FrameError::MalformedHello(e.to_string()))
    }
}
