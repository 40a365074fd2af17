//! JSON-RPC 2.0 message envelopes and error codes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ClientError;

/// JSON-RPC: invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC: the JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC: the method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC: invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC: internal error while handling the request.
pub const INTERNAL_ERROR: i64 = -32603;
/// Server-defined: the request was understood but refused (policy denial,
/// jail violation).
pub const REQUEST_FAILED: i64 = -32000;

/// Error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional structured error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decoded inbound message, before classification.
///
/// JSON-RPC distinguishes three shapes on the wire: requests (`method` +
/// `id`), notifications (`method`, no `id`), and responses (`id` + either
/// `result` or `error`). All fields are optional here so one deserialization
/// covers all three.
#[derive(Debug, Deserialize)]
pub struct Incoming {
    /// Correlation id; present on requests and responses.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name; present on requests and notifications.
    #[serde(default)]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
    /// Successful response payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error response payload.
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Build an outbound request envelope.
#[must_use]
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build an outbound notification envelope (no id, no reply expected).
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Build a successful response envelope echoing the request's `id`.
#[must_use]
pub fn response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error response envelope echoing the request's `id`.
#[must_use]
pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// JSON-RPC error code to report for a callback handler failure.
#[must_use]
pub fn error_code_for(err: &ClientError) -> i64 {
    match err {
        ClientError::MethodNotFound(_) => METHOD_NOT_FOUND,
        ClientError::InvalidArgument(_) | ClientError::NotFound(_) => INVALID_PARAMS,
        ClientError::PathViolation(_) | ClientError::PermissionDenied(_) => REQUEST_FAILED,
        _ => INTERNAL_ERROR,
    }
}
