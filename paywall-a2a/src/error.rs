//! Errors raised by the A2A client registry and its JSON-RPC/SSE client.

use paywall_core::rpc::{RpcError, ToRpcError};

/// Errors raised while resolving a client from the registry or while
/// driving a JSON-RPC/SSE call through it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum A2aError {
    /// A required field was empty.
    #[error("{field} is required")]
    Validation {
        /// The name of the missing field.
        field: &'static str,
    },

    /// The agent card does not advertise `capabilities.streaming`, but a
    /// streaming operation was requested.
    #[error("agent does not advertise streaming capability")]
    StreamingNotSupported,

    /// The presented access token was rejected.
    #[error("invalid or expired access token")]
    InvalidToken,

    /// Transport-level failure reaching the agent.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The agent responded with a non-2xx status.
    #[error("agent returned {status}: {message}")]
    Backend {
        /// The HTTP status the agent returned.
        status: reqwest::StatusCode,
        /// The response body, if any.
        message: String,
    },

    /// The agent's JSON-RPC response carried an `error` member.
    #[error("agent JSON-RPC error {code}: {message}")]
    RpcError {
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },

    /// A dispatched SSE event did not parse as a JSON-RPC 2.0 response, or
    /// its `id` did not match the request that opened the stream.
    #[error("SSE stream protocol error: {0}")]
    StreamProtocol(String),
}

impl ToRpcError for A2aError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Validation { field } => RpcError::invalid_params(format!("{field} is required")),
            Self::StreamingNotSupported => RpcError::misconfiguration(self.to_string()),
            Self::InvalidToken => RpcError::payment_required(self.to_string(), "invalid_token"),
            Self::Network(_) | Self::Backend { .. } | Self::RpcError { .. } | Self::StreamProtocol(_) => {
                RpcError::misconfiguration(self.to_string())
            }
        }
    }
}
