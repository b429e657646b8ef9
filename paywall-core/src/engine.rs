//! The paywall engine: orchestrates auth → handler → credits → settle.
//!
//! A protected call is authenticated (C4), the handler runs, credits are
//! resolved (C5), and the result is settled (C2) before a response is
//! returned to the caller. Streaming handlers settle after their stream
//! completes, even if the external consumer stops reading early — see
//! [`call_streaming`] for how that is done without async drop.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::auth::{self, AuthError, VerifyContext};
use crate::credits::{self, CreditsError, CreditsOption};
use crate::facilitator::{self, FacilitatorClient, FacilitatorError, PlanSchemeCache};
use crate::rpc::{RpcError, ToRpcError};
use crate::types::{AuthResult, HandlerKind, OnRedeemError, PaywallContext, SettlementMeta};

/// A boxed stream of JSON value chunks, as produced by a streaming handler.
pub type BoxValueStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// The tagged union a protected handler's result is introspected into: a
/// plain value, or an asynchronously-iterable stream of chunks.
pub enum HandlerOutput {
    /// A single synchronous result.
    Value(Value),
    /// A stream of chunks, settled once the stream completes.
    Stream(BoxValueStream),
}

/// Per-handler paywall configuration.
#[derive(Clone)]
pub struct PaywallOptions {
    /// What kind of capability this handler exposes.
    pub kind: HandlerKind,
    /// The tool/resource/prompt name.
    pub name: String,
    /// How to compute the credit cost of a call.
    pub credits: CreditsOption,
    /// Overrides the plan id otherwise derived from the token.
    pub plan_id: Option<String>,
    /// Upper bound passed to the facilitator as `maxAmount`.
    pub max_amount: Option<u64>,
    /// What to do when settlement fails.
    pub on_redeem_error: OnRedeemError,
}

/// The outcome of a protected call, ready to hand back to the transport
/// binding (MCP or x402-HTTP).
pub enum CallOutcome {
    /// A value response with settlement metadata merged onto it.
    Value(Value),
    /// A stream of handler chunks, followed by a settlement-metadata chunk.
    Stream(BoxValueStream),
}

/// Errors raised while running a protected call end to end.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PaywallError {
    /// The server is not configured (e.g. missing `agentId`).
    #[error("paywall misconfigured: {0}")]
    Misconfiguration(String),
    /// Authentication failed; see [`AuthError`].
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The handler itself returned an error. Settlement is skipped and the
    /// error propagates unchanged.
    #[error("handler error: {0}")]
    Handler(String),
    /// A settlement failure that must be surfaced because
    /// `onRedeemError == propagate`.
    #[error("settlement failed: {0}")]
    SettlementPropagated(String),
}

impl ToRpcError for PaywallError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Misconfiguration(msg) => RpcError::misconfiguration(msg.clone()),
            Self::Auth(e) => e.to_rpc_error(),
            Self::Handler(msg) => RpcError::misconfiguration(msg.clone()),
            Self::SettlementPropagated(msg) => RpcError::misconfiguration(msg.clone()),
        }
    }
}

/// Shared engine state: one instance per MCP server / x402-HTTP middleware.
pub struct PaywallEngine {
    facilitator: FacilitatorClient,
    plan_scheme_cache: PlanSchemeCache,
    agent_id: String,
    server_name: String,
}

impl PaywallEngine {
    /// Builds an engine bound to one facilitator and agent identity.
    #[must_use]
    pub fn new(facilitator: FacilitatorClient, agent_id: String, server_name: String) -> Self {
        Self {
            facilitator,
            plan_scheme_cache: PlanSchemeCache::new(),
            agent_id,
            server_name,
        }
    }

    /// Authenticates, invokes `handler`, resolves credits, and settles.
    ///
    /// `handler` receives the call's args, the SDK `extra` object, and the
    /// resolved [`PaywallContext`], and must return a [`HandlerOutput`].
    ///
    /// # Errors
    ///
    /// Returns [`PaywallError::Misconfiguration`] if `agent_id` is unset,
    /// propagates [`AuthError`] from C4, and propagates handler errors
    /// unchanged (settlement never runs in that case).
    pub async fn call<H, Fut>(
        &self,
        options: &PaywallOptions,
        args: Value,
        extra: Value,
        handler: H,
    ) -> Result<CallOutcome, PaywallError>
    where
        H: FnOnce(Value, Value, PaywallContext) -> Fut,
        Fut: Future<Output = Result<HandlerOutput, String>>,
    {
        if self.agent_id.is_empty() {
            return Err(PaywallError::Misconfiguration("agentId is not configured".to_owned()));
        }

        let call_args = flatten_args(&args);
        let auth = auth::authenticate(
            &self.facilitator,
            &self.plan_scheme_cache,
            VerifyContext {
                extra: &extra,
                plan_id: options.plan_id.as_deref(),
                agent_id: &self.agent_id,
                server_name: &self.server_name,
                name: &options.name,
                kind: options.kind,
                args: &call_args,
            },
        )
        .await?;

        let credits_pre =
            options.credits.is_fixed().then(|| credits::resolve(&options.credits, &args, None, &auth, &options.name)).transpose();
        let credits_pre = credits_pre.map_err(|e: CreditsError| PaywallError::Misconfiguration(e.to_string()))?;

        let effective_plan_id = options.plan_id.clone().unwrap_or_else(|| auth.plan_id.clone());
        let ctx = PaywallContext {
            subscriber_address: auth.subscriber_address.clone(),
            agent_request: auth.agent_request.clone(),
            plan_id: effective_plan_id.clone(),
            credits: credits_pre,
            auth: auth.clone(),
        };

        let output = handler(args.clone(), extra, ctx).await.map_err(PaywallError::Handler)?;

        match output {
            HandlerOutput::Value(result) => {
                let credits = resolve_final_credits(options, &args, Some(&result), &auth, credits_pre)?;
                let mut value = result;
                if credits > 0 {
                    let settle_result = self.settle(&auth, &effective_plan_id, credits, options).await;
                    merge_meta(&mut value, &settle_result_to_meta(&settle_result, &effective_plan_id, &auth.subscriber_address));
                    self.enforce_propagation(options, &settle_result)?;
                }
                Ok(CallOutcome::Value(value))
            }
            HandlerOutput::Stream(stream) => {
                let engine = self.snapshot();
                let options = options.clone();
                let args = args.clone();
                Ok(CallOutcome::Stream(call_streaming(engine, options, args, auth, credits_pre, stream)))
            }
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            facilitator: self.facilitator.clone(),
        }
    }

    async fn settle(
        &self,
        auth: &AuthResult,
        plan_id: &str,
        credits: u64,
        options: &PaywallOptions,
    ) -> Result<crate::types::SettleResult, FacilitatorError> {
        settle_with_fallback(&self.facilitator, auth, plan_id, credits, options).await
    }

    fn enforce_propagation(
        &self,
        options: &PaywallOptions,
        result: &Result<crate::types::SettleResult, FacilitatorError>,
    ) -> Result<(), PaywallError> {
        enforce_propagation_policy(options, result)
    }
}

// A cheap, cloneable handle carried into the spawned streaming task so the
// task can outlive the borrow of `&self`.
#[derive(Clone)]
struct EngineSnapshot {
    facilitator: FacilitatorClient,
}

fn resolve_final_credits(
    options: &PaywallOptions,
    args: &Value,
    result: Option<&Value>,
    auth: &AuthResult,
    credits_pre: Option<u64>,
) -> Result<u64, PaywallError> {
    if let Some(fixed) = credits_pre {
        return Ok(fixed);
    }
    credits::resolve(&options.credits, args, result, auth, &options.name).map_err(|e| PaywallError::Misconfiguration(e.to_string()))
}

fn enforce_propagation_policy(
    options: &PaywallOptions,
    result: &Result<crate::types::SettleResult, FacilitatorError>,
) -> Result<(), PaywallError> {
    let failed = match result {
        Ok(settle) => !settle.success,
        Err(_) => true,
    };
    if failed && options.on_redeem_error == OnRedeemError::Propagate {
        let message = match result {
            Ok(settle) => settle.error_reason.clone().unwrap_or_else(|| "settlement denied".to_owned()),
            Err(e) => e.to_string(),
        };
        return Err(PaywallError::SettlementPropagated(message));
    }
    Ok(())
}

async fn settle_with_fallback(
    facilitator: &FacilitatorClient,
    auth: &AuthResult,
    plan_id: &str,
    credits: u64,
    options: &PaywallOptions,
) -> Result<crate::types::SettleResult, FacilitatorError> {
    let challenge = facilitator::build_payment_required(plan_id, &auth.logical_url, &auth.agent_id, "POST", None, None);
    let max_amount = options.max_amount.or(Some(credits));
    let agent_request_id = auth.agent_request.as_ref().and_then(|r| r.agent_request_id.as_deref());

    match facilitator.settle_permissions(&challenge, &auth.token, max_amount, agent_request_id, None, None).await {
        Ok(settle) if settle.success => Ok(settle),
        first_outcome => {
            let Some(http_url) = &auth.http_url else {
                return Ok(failed_settle_result(first_outcome));
            };
            let fallback_challenge = facilitator::build_payment_required(plan_id, http_url, &auth.agent_id, "POST", None, None);
            match facilitator.settle_permissions(&fallback_challenge, &auth.token, max_amount, agent_request_id, None, None).await {
                Ok(settle) => Ok(settle),
                Err(e) => Ok(crate::types::SettleResult {
                    success: false,
                    error_reason: Some(e.to_string()),
                    transaction: String::new(),
                    ..Default::default()
                }),
            }
        }
    }
}

fn failed_settle_result(outcome: Result<crate::types::SettleResult, FacilitatorError>) -> crate::types::SettleResult {
    match outcome {
        Ok(settle) => settle,
        Err(e) => crate::types::SettleResult {
            success: false,
            error_reason: Some(e.to_string()),
            transaction: String::new(),
            ..Default::default()
        },
    }
}

fn settle_result_to_meta(
    result: &Result<crate::types::SettleResult, FacilitatorError>,
    plan_id: &str,
    subscriber_address: &str,
) -> SettlementMeta {
    match result {
        Ok(settle) => SettlementMeta::from_settle_result(settle, plan_id.to_owned(), subscriber_address.to_owned()),
        Err(e) => SettlementMeta {
            plan_id: plan_id.to_owned(),
            subscriber_address: subscriber_address.to_owned(),
            success: false,
            error_reason: Some(e.to_string()),
            ..Default::default()
        },
    }
}

/// Merges settlement metadata onto a handler's JSON result under `_meta`.
fn merge_meta(value: &mut Value, meta: &SettlementMeta) {
    let meta_value = serde_json::to_value(meta).unwrap_or_default();
    match value {
        Value::Object(map) => {
            let existing = map.entry("_meta").or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let (Value::Object(existing_map), Value::Object(new_map)) = (existing, meta_value) {
                existing_map.extend(new_map);
            }
        }
        _ => {
            let mut map = serde_json::Map::new();
            map.insert("_meta".to_owned(), meta_value);
            *value = Value::Object(map);
        }
    }
}

/// Drives a handler's stream to completion in a background task so
/// settlement still happens even if the caller stops polling early.
///
/// This is the Rust-idiomatic replacement for "settle in the async
/// generator's `finally` clause": Rust has no async `Drop`, so early
/// termination by the consumer cannot itself trigger settlement. Instead
/// the background task owns the handler stream independently of whatever
/// the caller does with its receiving end; if the caller drops its stream,
/// the channel send simply starts failing and the trailing metadata chunk
/// is silently discarded, matching the spec's "chunk is never delivered"
/// behavior while still guaranteeing settlement runs exactly once.
fn call_streaming(
    engine: EngineSnapshot,
    options: PaywallOptions,
    args: Value,
    auth: AuthResult,
    credits_pre: Option<u64>,
    mut inner: BoxValueStream,
) -> BoxValueStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Value>(8);

    tokio::spawn(async move {
        let mut last_chunk: Option<Value> = None;
        while let Some(chunk) = inner.next().await {
            if tx.send(chunk.clone()).await.is_err() {
                // consumer gone; keep draining so settlement still sees the
                // true final chunk and runs exactly once.
            }
            last_chunk = Some(chunk);
        }

        let credits = match resolve_final_credits(&options, &args, last_chunk.as_ref(), &auth, credits_pre) {
            Ok(credits) => credits,
            Err(_) => return,
        };
        if credits == 0 {
            return;
        }

        let effective_plan_id = options.plan_id.clone().unwrap_or_else(|| auth.plan_id.clone());
        let settle_result = settle_with_fallback(&engine.facilitator, &auth, &effective_plan_id, credits, &options).await;
        let meta = settle_result_to_meta(&settle_result, &effective_plan_id, &auth.subscriber_address);
        let mut meta_value = Value::Object(serde_json::Map::new());
        merge_meta(&mut meta_value, &meta);
        let _ = tx.send(meta_value).await;
    });

    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

fn flatten_args(args: &Value) -> BTreeMap<String, String> {
    let Some(object) = args.as_object() else {
        return BTreeMap::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_meta_onto_object_result() {
        let mut value = serde_json::json!({"answer": "hi"});
        let meta = SettlementMeta {
            plan_id: "p1".to_owned(),
            subscriber_address: "0xab".to_owned(),
            success: true,
            credits_redeemed: Some("2".to_owned()),
            ..Default::default()
        };
        merge_meta(&mut value, &meta);
        assert_eq!(value["_meta"]["creditsRedeemed"], "2");
        assert_eq!(value["answer"], "hi");
    }

    #[test]
    fn flattens_object_args_to_strings() {
        let args = serde_json::json!({"x": 1, "city": "London"});
        let flat = flatten_args(&args);
        assert_eq!(flat.get("x").map(String::as_str), Some("1"));
        assert_eq!(flat.get("city").map(String::as_str), Some("London"));
    }
}
