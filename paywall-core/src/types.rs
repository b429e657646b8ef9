//! Shared data model: the types that flow between C1-C7.
//!
//! Mirrors the wire shapes a TypeScript x402/Nevermined client would
//! recognize (`camelCase` fields), while staying idiomatic Rust internally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which kind of capability a protected handler exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// An MCP tool.
    Tool,
    /// An MCP resource (possibly templated).
    Resource,
    /// An MCP prompt.
    Prompt,
}

impl HandlerKind {
    /// The plural noun used in logical URLs (`tools`, `resources`, `prompts`).
    #[must_use]
    pub const fn url_segment(self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Resource => "resources",
            Self::Prompt => "prompts",
        }
    }
}

/// The `resource` object embedded in a [`PaymentRequired`] challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// The logical or HTTP URL of the protected resource.
    pub url: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One accepted payment option inside a [`PaymentRequired`] challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayment {
    /// Payment scheme identifier, e.g. `nvm:erc4337`.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// The plan this payment option is billed against.
    pub plan_id: String,
    /// Free-form scheme extras (`agentId`, `httpVerb`, `version`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<AcceptedExtra>,
}

/// Scheme-specific extras carried on an [`AcceptedPayment`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedExtra {
    /// The agent that owns the protected endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// The HTTP verb the endpoint is reachable under (x402-HTTP only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_verb: Option<String>,
    /// Protocol version hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The x402 v2 `402 Payment Required` challenge object.
///
/// Emitted on 402 responses and echoed into `verify`/`settle` calls so the
/// facilitator can re-derive exactly what was offered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Always `2` for this protocol generation.
    pub x402_version: u8,
    /// The resource being protected.
    pub resource: ResourceInfo,
    /// The payment options the facilitator will accept.
    pub accepts: Vec<AcceptedPayment>,
    /// Protocol extension bag, empty by default.
    #[serde(default)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl PaymentRequired {
    /// The protocol version this crate speaks.
    pub const VERSION: u8 = 2;
}

/// Outcome of a `verifyPermissions` call against the facilitator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    /// Whether the presented entitlement is valid.
    pub is_valid: bool,
    /// Machine-readable reason when `isValid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// The resolved payer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Facilitator-assigned id for this request, used by later redeem calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_request_id: Option<String>,
    /// Observability payload returned alongside verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_request: Option<StartAgentRequest>,
    /// Which endpoint (logical or HTTP) this verify call matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_matching: Option<String>,
}

/// Outcome of a `settlePermissions` (or redeem) call against the facilitator.
///
/// `transaction` is the empty string on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResult {
    /// Whether the settlement succeeded.
    pub success: bool,
    /// Machine-readable reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// The payer address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// On-chain (or facilitator-assigned) transaction reference, `""` on failure.
    #[serde(default)]
    pub transaction: String,
    /// The network the settlement occurred on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Number of credits burned, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_redeemed: Option<String>,
    /// Remaining plan balance after settlement, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<String>,
    /// Order transaction reference, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_tx: Option<String>,
}

/// Plan balance snapshot embedded in a [`StartAgentRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBalance {
    /// Plan identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Plan display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    /// Plan type (e.g. `credit`, `trial`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    /// The subscriber's wallet address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_address: Option<String>,
    /// Remaining balance, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    /// Address of the on-chain credits contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_contract: Option<String>,
    /// Price per credit, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_credit: Option<String>,
    /// Whether the holder currently has an active subscription.
    #[serde(default)]
    pub is_subscriber: bool,
}

/// Observability payload returned by `verifyPermissions`/`startProcessingRequest`.
///
/// Consumed by logging/metrics layers outside this crate; the paywall
/// engine only threads it through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAgentRequest {
    /// Facilitator-assigned request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_request_id: Option<String>,
    /// Agent display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Agent id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Plan balance snapshot.
    #[serde(default)]
    pub balance: PlanBalance,
    /// Which endpoint (logical/HTTP) this request matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_matching: Option<String>,
    /// Which HTTP verb this request matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb_matching: Option<String>,
    /// Whether this request is part of a batch.
    #[serde(default)]
    pub batch: bool,
}

/// What happens when settlement fails and `onRedeemError` governs the
/// outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnRedeemError {
    /// Record the failure in response metadata; the call still completes.
    Ignore,
    /// Discard the handler result and surface a misconfiguration error.
    Propagate,
}

impl Default for OnRedeemError {
    fn default() -> Self {
        Self::Ignore
    }
}

/// Auth information resolved by C4 and handed into the engine and handlers.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The raw bearer token as presented by the caller.
    pub token: String,
    /// The agent id the request was authenticated against.
    pub agent_id: String,
    /// The plan the request was billed against.
    pub plan_id: String,
    /// The subscriber's wallet address, decoded from the token.
    pub subscriber_address: String,
    /// The deterministic `mcp://` identifier for this call.
    pub logical_url: String,
    /// The concrete HTTP URL of the inbound request, when known.
    pub http_url: Option<String>,
    /// Observability payload from the successful verify call.
    pub agent_request: Option<StartAgentRequest>,
}

/// Extra context passed alongside `(args, extra)` into a protected handler.
#[derive(Debug, Clone)]
pub struct PaywallContext {
    /// The resolved auth result for this call.
    pub auth: AuthResult,
    /// Credits charged for this call; `None` before dynamic resolution runs.
    pub credits: Option<u64>,
    /// The plan this call is billed against.
    pub plan_id: String,
    /// The subscriber's wallet address.
    pub subscriber_address: String,
    /// Observability payload from the successful verify call.
    pub agent_request: Option<StartAgentRequest>,
}

/// Settlement metadata merged onto a successful response (or emitted as the
/// trailing chunk of a stream).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementMeta {
    /// Transaction hash, when settlement produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Credits burned by this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_redeemed: Option<String>,
    /// Remaining plan balance after settlement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<String>,
    /// The plan this call was billed against.
    pub plan_id: String,
    /// The subscriber's wallet address.
    pub subscriber_address: String,
    /// Whether settlement succeeded.
    pub success: bool,
    /// Present only when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl SettlementMeta {
    /// Builds the metadata object from a [`SettleResult`] and the context it
    /// was billed under.
    #[must_use]
    pub fn from_settle_result(
        result: &crate::types::SettleResult,
        plan_id: String,
        subscriber_address: String,
    ) -> Self {
        Self {
            tx_hash: (!result.transaction.is_empty()).then(|| result.transaction.clone()),
            credits_redeemed: result.credits_redeemed.clone(),
            remaining_balance: result.remaining_balance.clone(),
            plan_id,
            subscriber_address,
            success: result.success,
            error_reason: result.error_reason.clone(),
        }
    }
}
