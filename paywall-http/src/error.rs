//! Errors raised while encoding/decoding x402-HTTP wire headers and while
//! running the payment-gate middleware itself.

use paywall_core::facilitator::FacilitatorError;
use paywall_core::rpc::{RpcError, ToRpcError};

/// Errors that can occur while encoding or decoding a `payment-required` /
/// `payment-response` header value.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HeaderCodecError {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes were not valid UTF-8.
    #[error("header value is not valid UTF-8")]
    Utf8,
}

/// Errors raised by the payment-gate middleware while handling a request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PaygateError {
    /// The `payment-signature` header was missing.
    #[error("payment-signature header is required")]
    MissingBearer,

    /// The presented entitlement was rejected by the facilitator.
    #[error("payment rejected: {0}")]
    Invalid(String),

    /// Settlement failed after a successful handler response. The response
    /// is still emitted; this is recorded rather than propagated.
    #[error("settlement failed: {0}")]
    Settlement(String),

    /// A header could not be encoded or decoded.
    #[error(transparent)]
    Header(#[from] HeaderCodecError),

    /// The facilitator could not be reached or returned an error.
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
}

impl ToRpcError for PaygateError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::MissingBearer => RpcError::payment_required(self.to_string(), "missing"),
            Self::Invalid(reason) => RpcError::payment_required(self.to_string(), reason.clone()),
            Self::Settlement(_) => RpcError::misconfiguration(self.to_string()),
            Self::Header(_) => RpcError::misconfiguration(self.to_string()),
            Self::Facilitator(e) => e.to_rpc_error(),
        }
    }
}
