//! Shared JSON-RPC error shape used to surface paywall failures to callers.
//!
//! The paywall engine never throws raw exceptions across the protocol
//! boundary; every failure that must be visible to an MCP or JSON-RPC caller
//! is converted into an [`RpcError`] carrying one of the reserved codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Missing `agentId`, a propagated redeem failure, or another invalid option.
pub const MISCONFIGURATION: i64 = -32_002;
/// Missing or invalid bearer token, or a settlement denial under `propagate`.
pub const PAYMENT_REQUIRED: i64 = -32_003;
/// Malformed request parameters.
pub const INVALID_PARAMS: i64 = -32_602;

/// A JSON-RPC 2.0 error object: `{code, message, data}`.
///
/// Every paywall error type that must cross a JSON-RPC boundary converts
/// into this shape via [`ToRpcError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// The JSON-RPC error code.
    pub code: i64,
    /// A human-readable summary.
    pub message: String,
    /// Arbitrary structured detail (e.g. `{reason: "missing"}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Builds a `-32002` misconfiguration error.
    #[must_use]
    pub fn misconfiguration(message: impl Into<String>) -> Self {
        Self {
            code: MISCONFIGURATION,
            message: message.into(),
            data: None,
        }
    }

    /// Builds a `-32003` payment-required error with a `data.reason` field.
    #[must_use]
    pub fn payment_required(message: impl Into<String>, reason: &str) -> Self {
        Self {
            code: PAYMENT_REQUIRED,
            message: message.into(),
            data: Some(serde_json::json!({ "reason": reason })),
        }
    }

    /// Builds a `-32602` invalid-params error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Converts a domain error into the wire [`RpcError`] shape.
pub trait ToRpcError {
    /// Performs the conversion.
    fn to_rpc_error(&self) -> RpcError;
}
