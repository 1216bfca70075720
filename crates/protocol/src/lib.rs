//! Wire types for the DevTools endpoint protocol.
//!
//! This crate contains the serde-serializable shapes exchanged with a remote
//! browser automation endpoint over its WebSocket debugger URL. Types here are
//! pure data: no behavior beyond serialization/deserialization. The
//! correlation and dispatch machinery lives in `underpass-runtime`.

pub mod query;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default timeout in milliseconds for endpoint operations.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Command message sent to the endpoint.
///
/// Commands addressed to a specific page target carry the `sessionId` obtained
/// from attaching to that target; browser-level commands omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique command ID for correlating responses.
    pub id: u32,
    /// Method name, `Domain.method` form (e.g. `Page.navigate`).
    pub method: String,
    /// Method parameters as a JSON object.
    pub params: Value,
    /// Target session this command is scoped to, if any.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Response message from the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Command ID this response correlates to.
    pub id: u32,
    /// Success result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

/// Error payload attached to a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    /// Numeric error code reported by the endpoint.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

/// Unsolicited event message from the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event method name, `Domain.event` form (e.g. `Fetch.requestPaused`).
    pub method: String,
    /// Event parameters as a JSON object.
    #[serde(default)]
    pub params: Value,
    /// Target session the event originated from, if any.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Discriminated union of inbound endpoint messages.
///
/// Responses carry an `id`; events do not. The catch-all variant keeps the
/// reader forward-compatible with message shapes we do not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Response message (has `id` field).
    Response(Response),
    /// Event message (no `id` field).
    Event(Event),
    /// Unknown message type (ignored).
    Unknown(Value),
}
