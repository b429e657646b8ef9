//! Credit cost resolution.
//!
//! Fixed credits are resolved before the handler runs, so handlers can see
//! the value in `PaywallContext.credits`; a dynamic (function) cost is
//! resolved afterward, once the handler's result is known.

use std::sync::Arc;

use serde_json::Value;

use crate::rpc::{RpcError, ToRpcError};
use crate::types::AuthResult;

/// The credit cost configured for a protected handler.
#[derive(Clone)]
pub enum CreditsOption {
    /// A fixed cost, resolved before the handler runs.
    Fixed(u64),
    /// A cost computed from the call's args, result, and auth, resolved
    /// after the handler runs.
    Dynamic(Arc<dyn Fn(CreditsArgs<'_>) -> Result<u64, CreditsError> + Send + Sync>),
}

impl std::fmt::Debug for CreditsOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl Default for CreditsOption {
    fn default() -> Self {
        Self::Fixed(1)
    }
}

impl CreditsOption {
    /// Returns `true` if this option resolves without seeing the handler's
    /// result.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }
}

/// Arguments passed to a dynamic credits function.
pub struct CreditsArgs<'a> {
    /// The call's input arguments.
    pub args: &'a Value,
    /// The handler's result, `None` when resolving before the handler runs.
    pub result: Option<&'a Value>,
    /// The auth header presented by the caller.
    pub auth_header: &'a str,
    /// The logical URL of the call.
    pub logical_url: &'a str,
    /// The name of the tool/resource/prompt being called.
    pub tool_name: &'a str,
}

/// Errors raised while resolving credit cost.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CreditsError {
    /// A dynamic credits function returned a negative value. This is a
    /// contract violation, not a runtime failure.
    #[error("credits function returned a negative value")]
    Negative,
    /// A dynamic credits function failed for another reason.
    #[error("credits function failed: {0}")]
    Failed(String),
}

impl ToRpcError for CreditsError {
    fn to_rpc_error(&self) -> RpcError {
        RpcError::misconfiguration(self.to_string())
    }
}

/// Resolves the credit cost for a call.
///
/// `result` is `None` before the handler runs (only meaningful for
/// [`CreditsOption::Fixed`]) and `Some` after. `tool_name` is the
/// tool/resource/prompt name the call was made against, not the agent id.
///
/// # Errors
///
/// Returns [`CreditsError::Negative`] if a dynamic function returns a
/// negative value, or [`CreditsError::Failed`] if it fails outright.
pub fn resolve(
    option: &CreditsOption,
    args: &Value,
    result: Option<&Value>,
    auth: &AuthResult,
    tool_name: &str,
) -> Result<u64, CreditsError> {
    match option {
        CreditsOption::Fixed(credits) => Ok(*credits),
        CreditsOption::Dynamic(resolver) => resolver(CreditsArgs {
            args,
            result,
            auth_header: &auth.token,
            logical_url: &auth.logical_url,
            tool_name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth() -> AuthResult {
        AuthResult {
            token: "tok".to_owned(),
            agent_id: "did:nv:agent".to_owned(),
            plan_id: "p1".to_owned(),
            subscriber_address: "0xab".to_owned(),
            logical_url: "mcp://srv/tools/echo".to_owned(),
            http_url: None,
            agent_request: None,
        }
    }

    #[test]
    fn fixed_option_ignores_result() {
        let option = CreditsOption::Fixed(2);
        let auth = test_auth();
        let args = serde_json::json!({});
        assert_eq!(resolve(&option, &args, None, &auth, "echo").unwrap(), 2);
    }

    #[test]
    fn dynamic_option_reads_result() {
        let option = CreditsOption::Dynamic(Arc::new(|ctx: CreditsArgs<'_>| {
            Ok(ctx.result.and_then(|r| r.get("tokens")).and_then(Value::as_u64).unwrap_or(0))
        }));
        let auth = test_auth();
        let args = serde_json::json!({});
        let result = serde_json::json!({"tokens": 7});
        assert_eq!(resolve(&option, &args, Some(&result), &auth, "echo").unwrap(), 7);
    }

    #[test]
    fn dynamic_option_negative_is_contract_violation() {
        let option = CreditsOption::Dynamic(Arc::new(|_ctx: CreditsArgs<'_>| Err(CreditsError::Negative)));
        let auth = test_auth();
        let args = serde_json::json!({});
        let err = resolve(&option, &args, Some(&serde_json::json!({})), &auth, "echo").unwrap_err();
        assert!(matches!(err, CreditsError::Negative));
    }
}
