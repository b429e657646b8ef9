//! Errors raised by the MCP server manager and its HTTP handler.

use paywall_core::agent_card::AgentCardError;
use paywall_core::engine::PaywallError;
use paywall_core::rpc::{RpcError, ToRpcError};

/// Errors raised while registering handlers, starting, or stopping an
/// [`crate::server::McpServerManager`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum McpError {
    /// `registerTool`/`registerResource`/`registerPrompt` called outside
    /// `Idle`.
    #[error("registration is only legal while the server is idle")]
    NotIdle,
    /// `start` called outside `Idle`, or `stop` called outside `Running`.
    #[error("invalid server state transition: currently {current}")]
    InvalidTransition {
        /// The state the server was in when the transition was attempted.
        current: &'static str,
    },
    /// `agentId` was empty at `start` time.
    #[error("agentId is not configured")]
    MissingAgentId,
    /// The configured port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A protected call failed inside the paywall engine.
    #[error(transparent)]
    Paywall(#[from] PaywallError),
    /// Building a payment-aware agent card failed.
    #[error(transparent)]
    AgentCard(#[from] AgentCardError),
}

impl ToRpcError for McpError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::NotIdle | Self::InvalidTransition { .. } | Self::MissingAgentId | Self::Bind { .. } => {
                RpcError::misconfiguration(self.to_string())
            }
            Self::Paywall(e) => e.to_rpc_error(),
            Self::AgentCard(e) => e.to_rpc_error(),
        }
    }
}
