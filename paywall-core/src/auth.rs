//! Auth resolver: bearer extraction, verify-with-fallback, and plan/
//! subscriber resolution.
//!
//! The upstream MCP SDK hands handlers a heterogeneous "extra" object that
//! may carry headers under any of several shapes depending on transport.
//! Rather than special-casing each shape inline, [`BEARER_EXTRACTORS`] is an
//! ordered list of small functions, each attempting one well-defined path;
//! the first one to produce a non-empty value wins.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::facilitator::{self, FacilitatorClient};
use crate::logical_url;
use crate::request_context::RequestContext;
use crate::rpc::{RpcError, ToRpcError};
use crate::token::{self, DecodedToken};
use crate::types::{AuthResult, HandlerKind};

/// A single attempt at finding a bearer token inside the SDK's `extra`
/// object.
type BearerExtractor = fn(&Value) -> Option<String>;

/// Ordered list of extractors tried against the `extra` object, each a
/// known shape observed across MCP transports.
pub const BEARER_EXTRACTORS: &[BearerExtractor] = &[
    |extra| header_from(extra.get("requestInfo")?.get("headers")?),
    |extra| header_from(extra.get("request")?.get("headers")?),
    |extra| header_from(extra.get("headers")?),
    |extra| header_from(extra.get("connection")?.get("headers")?),
    |extra| header_from(extra.get("socket")?.get("handshake")?.get("headers")?),
];

fn header_from(headers: &Value) -> Option<String> {
    let object = headers.as_object()?;
    let raw = object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| value.as_str())?;
    strip_bearer_prefix(raw)
}

fn strip_bearer_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .unwrap_or(trimmed);
    (!token.is_empty()).then(|| token.to_owned())
}

/// Extracts the bearer token from the SDK `extra` object, falling back to
/// the request-context store (C7) installed at the HTTP entry point.
#[must_use]
pub fn extract_bearer(extra: &Value, ctx: Option<&RequestContext>) -> Option<String> {
    for extractor in BEARER_EXTRACTORS {
        if let Some(token) = extractor(extra) {
            return Some(token);
        }
    }
    let ctx = ctx?;
    ctx.headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| strip_bearer_prefix(value))
}

/// Errors raised while resolving auth for a protected call.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No bearer token could be located in `extra` or the request context.
    #[error("missing bearer token")]
    MissingBearer,
    /// Verification was attempted (and possibly retried against the HTTP
    /// fallback URL) but ultimately denied.
    #[error("payment verification denied: {message}")]
    Denied {
        /// Human-readable denial message, possibly enumerating plans.
        message: String,
    },
    /// The presented token could not be decoded.
    #[error("invalid access token: {0}")]
    InvalidToken(#[from] token::TokenCodecError),
    /// The facilitator backend itself failed.
    #[error(transparent)]
    Facilitator(#[from] facilitator::FacilitatorError),
}

impl ToRpcError for AuthError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::MissingBearer => RpcError::payment_required(self.to_string(), "missing"),
            Self::Denied { message } => RpcError::payment_required(message.clone(), "invalid"),
            Self::InvalidToken(_) => RpcError::payment_required(self.to_string(), "invalid"),
            Self::Facilitator(_) => RpcError::payment_required(self.to_string(), "invalid"),
        }
    }
}

/// A brief summary of one of the agent's plans, used only to enumerate
/// options in a denial message.
#[derive(Debug, Clone)]
pub struct PlanSummary {
    /// The plan's identifier.
    pub plan_id: String,
    /// The plan's display name.
    pub plan_name: Option<String>,
}

/// Context needed to run [`verify_with_fallback`] for one protected call.
pub struct VerifyContext<'a> {
    /// The SDK-supplied `extra` object.
    pub extra: &'a Value,
    /// The explicitly configured plan id, if any.
    pub plan_id: Option<&'a str>,
    /// The agent id this call is billed against.
    pub agent_id: &'a str,
    /// The MCP server name, used to build the logical URL.
    pub server_name: &'a str,
    /// The call name (tool/resource/prompt name).
    pub name: &'a str,
    /// What kind of capability is being called.
    pub kind: HandlerKind,
    /// The call's arguments, used to build the logical URL.
    pub args: &'a BTreeMap<String, String>,
}

/// Same as [`VerifyContext`] but for a meta (non tool/resource/prompt) MCP
/// method, which uses `mcp://<server>/meta/<method>` instead.
pub struct VerifyMetaContext<'a> {
    /// The SDK-supplied `extra` object.
    pub extra: &'a Value,
    /// The explicitly configured plan id, if any.
    pub plan_id: Option<&'a str>,
    /// The agent id this call is billed against.
    pub agent_id: &'a str,
    /// The MCP server name, used to build the logical URL.
    pub server_name: &'a str,
    /// The meta method name.
    pub method: &'a str,
}

/// Authenticates a tool/resource/prompt call.
///
/// # Errors
///
/// Returns [`AuthError`] when no bearer is present or verification is
/// ultimately denied.
pub async fn authenticate(
    facilitator: &FacilitatorClient,
    plan_scheme_cache: &facilitator::PlanSchemeCache,
    ctx: VerifyContext<'_>,
) -> Result<AuthResult, AuthError> {
    let logical_url = logical_url::build(ctx.server_name, ctx.kind, ctx.name, ctx.args);
    verify_with_fallback(facilitator, plan_scheme_cache, ctx.extra, ctx.plan_id, ctx.agent_id, logical_url).await
}

/// Authenticates a meta MCP method call.
///
/// # Errors
///
/// Returns [`AuthError`] when no bearer is present or verification is
/// ultimately denied.
pub async fn authenticate_meta(
    facilitator: &FacilitatorClient,
    plan_scheme_cache: &facilitator::PlanSchemeCache,
    ctx: VerifyMetaContext<'_>,
) -> Result<AuthResult, AuthError> {
    let logical_url = logical_url::build_meta(ctx.server_name, ctx.method, &BTreeMap::new());
    verify_with_fallback(facilitator, plan_scheme_cache, ctx.extra, ctx.plan_id, ctx.agent_id, logical_url).await
}

async fn verify_with_fallback(
    facilitator: &FacilitatorClient,
    plan_scheme_cache: &facilitator::PlanSchemeCache,
    extra: &Value,
    option_plan_id: Option<&str>,
    agent_id: &str,
    logical_url: String,
) -> Result<AuthResult, AuthError> {
    let request_ctx = crate::request_context::current();
    let token = extract_bearer(extra, request_ctx.as_ref()).ok_or(AuthError::MissingBearer)?;

    let decoded: DecodedToken = token::decode(&token)?;
    let http_url = request_ctx.as_ref().map(|ctx| http_url_from_context(ctx));

    let plan_id = match (option_plan_id, decoded.accepted_plan_id.as_deref()) {
        (Some(explicit), _) => explicit.to_owned(),
        (None, Some(from_token)) => from_token.to_owned(),
        (None, None) => first_plan_id(facilitator, agent_id).await.unwrap_or_default(),
    };
    let subscriber_address = decoded.subscriber_address.clone().unwrap_or_default();

    let scheme = plan_scheme_cache.get(&plan_id).await;
    let scheme = match scheme {
        Some(scheme) => scheme,
        None => {
            let resolved = facilitator::DEFAULT_SCHEME.to_owned();
            plan_scheme_cache.set(&plan_id, resolved.clone()).await;
            resolved
        }
    };

    let challenge = facilitator::build_payment_required(&plan_id, &logical_url, agent_id, "POST", None, Some(&scheme));
    let verify_result = facilitator.verify_permissions(&challenge, &token, None).await;

    let verified = match verify_result {
        Ok(result) if result.is_valid => Some((result, logical_url.clone())),
        _ => match &http_url {
            Some(http_url) => {
                let fallback_challenge =
                    facilitator::build_payment_required(&plan_id, http_url, agent_id, "POST", None, Some(&scheme));
                match facilitator.verify_permissions(&fallback_challenge, &token, None).await {
                    Ok(result) if result.is_valid => Some((result, http_url.clone())),
                    _ => None,
                }
            }
            None => None,
        },
    };

    let Some((result, _url_matching)) = verified else {
        let plans = best_effort_plans(facilitator, agent_id).await;
        let message = if plans.is_empty() {
            "payment verification denied".to_owned()
        } else {
            let names = plans
                .iter()
                .map(|p| p.plan_name.clone().unwrap_or_else(|| p.plan_id.clone()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("payment verification denied; available plans: {names}")
        };
        return Err(AuthError::Denied { message });
    };

    // The logical URL is always reported on the AuthResult, regardless of
    // which endpoint (logical or HTTP fallback) the facilitator matched.
    Ok(AuthResult {
        token,
        agent_id: agent_id.to_owned(),
        plan_id,
        subscriber_address,
        logical_url,
        http_url,
        agent_request: result.agent_request,
    })
}

fn http_url_from_context(ctx: &RequestContext) -> String {
    let proto = ctx
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("x-forwarded-proto"))
        .map(|(_, value)| value.as_str())
        .unwrap_or("http");
    let host = ctx
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.as_str())
        .unwrap_or("");
    format!("{proto}://{host}{}", ctx.url)
}

async fn first_plan_id(facilitator: &FacilitatorClient, agent_id: &str) -> Option<String> {
    best_effort_plans(facilitator, agent_id).await.into_iter().next().map(|p| p.plan_id)
}

async fn best_effort_plans(facilitator: &FacilitatorClient, agent_id: &str) -> Vec<PlanSummary> {
    facilitator
        .list_agent_plans(agent_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .take(3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_from_request_info_headers() {
        let extra = serde_json::json!({
            "requestInfo": { "headers": { "Authorization": "Bearer abc" } }
        });
        assert_eq!(extract_bearer(&extra, None).as_deref(), Some("abc"));
    }

    #[test]
    fn extracts_bearer_case_insensitively() {
        let extra = serde_json::json!({
            "headers": { "AUTHORIZATION": "bearer xyz" }
        });
        assert_eq!(extract_bearer(&extra, None).as_deref(), Some("xyz"));
    }

    #[test]
    fn falls_back_to_request_context() {
        let extra = serde_json::json!({});
        let ctx = RequestContext {
            headers: std::collections::HashMap::from([("authorization".to_owned(), "Bearer ctxtok".to_owned())]),
            method: "POST".to_owned(),
            url: "/mcp".to_owned(),
        };
        assert_eq!(extract_bearer(&extra, Some(&ctx)).as_deref(), Some("ctxtok"));
    }

    #[test]
    fn missing_bearer_returns_none() {
        let extra = serde_json::json!({});
        assert!(extract_bearer(&extra, None).is_none());
    }

    #[test]
    fn http_url_defaults_proto_to_http() {
        let ctx = RequestContext {
            headers: std::collections::HashMap::from([("host".to_owned(), "localhost:3000".to_owned())]),
            method: "POST".to_owned(),
            url: "/mcp".to_owned(),
        };
        assert_eq!(http_url_from_context(&ctx), "http://localhost:3000/mcp");
    }
}
