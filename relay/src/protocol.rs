//! Wire message types for the relay protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"type":"auth",...}` — the only frame accepted before authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: Option<String>,
    /// Compatibility shim: some clients still send `key` instead of
    /// `token`. Never emitted by this relay.
    pub key: Option<String>,
    pub role: String,
    pub device_id: Option<String>,
    pub target_device_id: Option<String>,
    #[serde(default)]
    pub last_ack: u64,
}

impl AuthFrame {
    /// The bearer credential, preferring `token` over the legacy `key` field.
    pub fn credential(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.key.as_deref().filter(|k| !k.is_empty()))
    }

    /// Device role also appears historically as `"phone"` or `"desktop"`
    /// on the wire; anything other than `"controller"` is treated as a
    /// device.
    pub fn is_controller(&self) -> bool {
        self.role == "controller"
    }
}

/// A command submitted by a controller, before the relay stamps an id.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCommand {
    pub cmd: String,
    #[serde(default)]
    pub params: Value,
}

/// A command forwarded to the device, with the relay-assigned id.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: u64,
    pub cmd: String,
    pub params: Value,
}

/// A response frame: produced by the device, forwarded verbatim to the
/// paired controller. `seq` is the relay's internal resume bookkeeping —
/// the device never sends it, but it is stamped in before the frame reaches
/// the controller, since otherwise a reconnecting controller has nothing to
/// compute `last_ack` from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq: Option<u64>,
}

/// Messages the relay sends to either role.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        resume_from: u64,
        phone_connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        gap: Option<bool>,
    },
    AuthFail {
        error: String,
    },
    CmdAccepted {
        id: u64,
    },
    PhoneStatus {
        connected: bool,
    },
    Ping,
    Error {
        error: String,
    },
}

/// Is this text frame a `{"type":"pong"}` liveness reply?
pub fn is_pong(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|t| t == "pong")
}

pub fn parse_auth(text: &str) -> Result<AuthFrame, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_response(text: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(text)
}
