//! Error types shared by the socket client and the chain-index layer.
use thiserror::Error;

/// Failures of the JSON-RPC socket transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("not connected")]
    NotConnected,
    #[error("request timed out: {method} (id {id})")]
    RequestTimeout { method: String, id: u64 },
    #[error("server error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("corrupt frame: {buffered} bytes buffered after {passes} failed passes")]
    CorruptFrame { buffered: usize, passes: u32 },
    #[error("transport: {0}")]
    Transport(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl RpcError {
    /// Build a protocol error from a JSON-RPC `error` member.
    ///
    /// Servers disagree on the shape: most send `{code, message}`, some a
    /// bare string.
    pub fn from_error_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => RpcError::Protocol {
                code: map.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| value.to_string()),
            },
            serde_json::Value::String(s) => RpcError::Protocol {
                code: 0,
                message: s.clone(),
            },
            other => RpcError::Protocol {
                code: 0,
                message: other.to_string(),
            },
        }
    }

    /// Server-side message text, if this is a protocol error.
    pub fn protocol_message(&self) -> Option<&str> {
        match self {
            RpcError::Protocol { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Failures of the chain-index client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("connection failed after {attempts} attempts: {last_error}")]
    Connection { attempts: u32, last_error: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("local transaction decode failed: {0}")]
    DecodeFallback(String),
    #[error("unexpected response to {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    pub fn unexpected(method: &str, detail: impl Into<String>) -> Self {
        ChainError::UnexpectedResponse {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }
}
