//! Error types shared across the runtime.

use std::fmt::{Display, Formatter};

/// Shared runtime result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Runtime error enumeration covering all client failure modes.
#[derive(Debug)]
pub enum ClientError {
    /// Agent process failed to start, crashed, or the stdio pipe broke.
    Transport(String),
    /// Malformed message, unsupported protocol version, or other wire-level
    /// contract violation.
    Protocol(String),
    /// The agent replied to a request with a JSON-RPC error object.
    Rpc {
        /// JSON-RPC error code from the agent's reply.
        code: i64,
        /// Human-readable message from the agent's reply.
        message: String,
    },
    /// File system path failed validation against the workspace root.
    PathViolation(String),
    /// The permission policy denied or abandoned the requested action.
    PermissionDenied(String),
    /// Requested entity (session, terminal) does not exist.
    NotFound(String),
    /// An agent callback named a method this client does not implement.
    MethodNotFound(String),
    /// Caller-supplied argument failed validation.
    InvalidArgument(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::MethodNotFound(msg) => write!(f, "method not found: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid json: {err}"))
    }
}
