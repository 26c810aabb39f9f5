//! Session wire messages.
//!
//! Every message is one JSON text frame. The client speaks
//! [`ClientMessage`]; the server answers with [`ConfigMessage`] once,
//! [`FlushMessage`] after every processed message, and [`ResponseMessage`]
//! for dispatched method calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound message.
///
/// `init` and `update` carry `data`; every other method is a call carrying
/// `tag` and `args`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    /// Method name. A message without one is a protocol error.
    pub method: Option<String>,
    /// Input values keyed by `name` or `name:type`.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    /// Correlation tag echoed in the response.
    pub tag: Option<Value>,
    /// Positional call arguments.
    pub args: Option<Vec<Value>>,
}

/// First message of every session.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigMessage {
    /// Session settings.
    pub config: SessionConfig,
}

/// Settings announced to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Worker identifier; empty for a single-process server.
    pub worker_id: String,
    /// Session id, used in `/session/{id}/...` URLs.
    pub session_id: String,
    /// Authenticated user, if any.
    pub user: Option<String>,
}

/// Output values and input messages accumulated since the last flush.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushMessage {
    /// Output errors by output name.
    pub errors: Map<String, Value>,
    /// Output values by output name.
    pub values: Map<String, Value>,
    /// Messages addressed to client-side inputs.
    pub input_messages: Vec<InputMessage>,
}

/// A message for one client-side input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputMessage {
    /// Input id.
    pub id: String,
    /// Input-specific payload.
    pub message: Value,
}

/// Reply to a dispatched method call.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    /// Tagged result.
    pub response: ResponseBody,
}

/// Tag and return value of a method call.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseBody {
    /// Tag from the request.
    pub tag: Value,
    /// Handler return value.
    pub value: Value,
}
