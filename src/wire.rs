//! Wire envelopes for all three hub boundaries.
//!
//! Every message is a JSON object tagged by a `type` discriminator and
//! modeled as a closed serde enum, so dispatch sites match exhaustively
//! and a new message type is a compile-time-visible change:
//!
//! - [`ExtensionMessage`] — extension → hub, over the WebSocket.
//! - [`HubMessage`] — hub → extension, over the WebSocket.
//! - [`ToolRequest`] / [`ToolResponse`] — consumer ↔ hub, one JSON
//!   object per line on the Unix socket.
//!
//! Malformed envelopes are logged and dropped by the transports, never
//! crashed on; deserialization failure is the only rejection mechanism.

// Rust guideline compliant 2026-07

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sent by an extension to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    /// The extension asks to become the active one.
    Activate,
    /// Result of a previously forwarded tool call.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        /// Correlation id from the originating `toolCall`.
        id: String,
        /// Successful payload; mutually exclusive with `error` by
        /// convention (if both are present, `error` wins).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Failure description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
}

/// Message sent by the hub to an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubMessage {
    /// Greeting carrying the id assigned to this connection.
    #[serde(rename_all = "camelCase")]
    Registered {
        /// Opaque id assigned by the registry.
        id: String,
    },
    /// Registry snapshot, broadcast after every mutation.
    #[serde(rename_all = "camelCase")]
    State {
        /// Id of the active extension, if any.
        active_id: Option<String>,
        /// Number of registered extensions.
        count: usize,
        /// Port the extension listener is bound to.
        port: u16,
        /// Base URL of the asset transfer server, if running.
        asset_server_url: Option<String>,
    },
    /// A tool call forwarded to the active extension.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// Correlation id; echo it back in the `toolResult`.
        id: String,
        /// The call itself.
        payload: ToolCallPayload,
    },
}

/// Name and arguments of a forwarded tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Tool name as issued by the consumer.
    pub name: String,
    /// Opaque argument object.
    #[serde(default = "empty_object")]
    pub args: Value,
}

/// Error shape reported by an extension inside a `toolResult`.
///
/// Converted into the closed taxonomy by
/// [`HubError::from_wire`](crate::error::HubError::from_wire) — the one
/// conversion point for this trust boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Optional machine-readable code claimed by the extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

/// One tool call issued by a consumer (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Caller-chosen correlation id, echoed in the response.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Argument object; defaults to `{}` when omitted.
    #[serde(default = "empty_object")]
    pub args: Value,
}

impl ToolRequest {
    /// Structural validation applied before routing.
    ///
    /// # Errors
    ///
    /// Returns a description of the first structural problem: empty id,
    /// empty name, or non-object args.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("request id must be a non-empty string".to_owned());
        }
        if self.name.trim().is_empty() {
            return Err("tool name must be a non-empty string".to_owned());
        }
        if !self.args.is_object() {
            return Err(format!(
                "args must be an object, got {}",
                json_kind(&self.args)
            ));
        }
        Ok(())
    }
}

/// Response to a [`ToolRequest`] (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Correlation id copied from the request.
    pub id: String,
    /// Successful payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ToolResponse {
    /// Build a success response.
    #[must_use]
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload),
            error: None,
        }
    }

    /// Build a failure response.
    #[must_use]
    pub fn fail(id: impl Into<String>, error: ErrorBody) -> Self {
        Self {
            id: id.into(),
            payload: None,
            error: Some(error),
        }
    }
}

/// Consumer-facing error body: code + message + optional hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-checkable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Category-selected troubleshooting hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Default for omitted `args` fields.
fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Human-readable JSON kind for validation messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
