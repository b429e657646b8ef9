//! Agent-card builder (C12): attaches payment metadata to an agent's
//! discovery card.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::{RpcError, ToRpcError};

/// How a protected agent's credit cost is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    /// A fixed credit cost per call.
    Fixed,
    /// A cost computed per call from its arguments or result.
    Dynamic,
}

/// The payment metadata merged onto an agent card's `capabilities.extensions`.
#[derive(Debug, Clone)]
pub struct PaymentMetadata {
    /// Whether the cost is fixed or dynamic.
    pub payment_type: PaymentType,
    /// Credit cost. Must be positive unless `is_trial_plan` is set, in which
    /// case zero is also allowed.
    pub credits: i64,
    /// The agent this card describes.
    pub agent_id: String,
    /// The plan this card is scoped to, if any.
    pub plan_id: Option<String>,
    /// Whether this agent card is offered under a trial plan.
    pub is_trial_plan: Option<bool>,
    /// Free-form human-readable cost description.
    pub cost_description: Option<String>,
}

/// Errors raised while building a payment-aware agent card.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentCardError {
    /// `agentId` was empty.
    #[error("agentId is required")]
    MissingAgentId,
    /// `credits` was not positive for a non-trial plan.
    #[error("credits must be greater than zero for a paid plan")]
    NonPositiveCredits,
}

impl ToRpcError for AgentCardError {
    fn to_rpc_error(&self) -> RpcError {
        RpcError::misconfiguration(self.to_string())
    }
}

/// Builds a payment-aware agent card from a base card and payment metadata.
///
/// Adds one entry to `capabilities.extensions` (creating the array, and the
/// `capabilities` object, if either is absent) with `uri:
/// "urn:nevermined:payment"` and a `params` object mirroring `metadata`.
///
/// # Errors
///
/// Returns [`AgentCardError::MissingAgentId`] when `agentId` is empty, or
/// [`AgentCardError::NonPositiveCredits`] when `credits` is not positive and
/// the plan is not a trial.
pub fn build_payment_agent_card(base: &Value, metadata: &PaymentMetadata) -> Result<Value, AgentCardError> {
    if metadata.agent_id.is_empty() {
        return Err(AgentCardError::MissingAgentId);
    }
    let is_trial = metadata.is_trial_plan.unwrap_or(false);
    if metadata.credits < 0 || (metadata.credits == 0 && !is_trial) {
        return Err(AgentCardError::NonPositiveCredits);
    }

    let mut card = base.clone();
    let mut params = serde_json::Map::new();
    params.insert("paymentType".to_owned(), serde_json::to_value(metadata.payment_type).unwrap_or_default());
    params.insert("credits".to_owned(), Value::from(metadata.credits));
    params.insert("agentId".to_owned(), Value::from(metadata.agent_id.clone()));
    if let Some(plan_id) = &metadata.plan_id {
        params.insert("planId".to_owned(), Value::from(plan_id.clone()));
    }
    if let Some(is_trial_plan) = metadata.is_trial_plan {
        params.insert("isTrialPlan".to_owned(), Value::from(is_trial_plan));
    }
    if let Some(cost_description) = &metadata.cost_description {
        params.insert("costDescription".to_owned(), Value::from(cost_description.clone()));
    }

    let extension = serde_json::json!({
        "uri": "urn:nevermined:payment",
        "params": Value::Object(params),
    });

    if !card.is_object() {
        card = Value::Object(serde_json::Map::new());
    }
    let object = card.as_object_mut().expect("card was just coerced to an object");
    let capabilities = object.entry("capabilities").or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !capabilities.is_object() {
        *capabilities = Value::Object(serde_json::Map::new());
    }
    let capabilities = capabilities.as_object_mut().expect("capabilities was just coerced to an object");
    let extensions = capabilities.entry("extensions").or_insert_with(|| Value::Array(Vec::new()));
    if !extensions.is_array() {
        *extensions = Value::Array(Vec::new());
    }
    let extensions = extensions.as_array_mut().expect("extensions was just coerced to an array");
    extensions.push(extension);

    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> PaymentMetadata {
        PaymentMetadata {
            payment_type: PaymentType::Fixed,
            credits: 5,
            agent_id: "did:nv:agent".to_owned(),
            plan_id: Some("plan-1".to_owned()),
            is_trial_plan: None,
            cost_description: None,
        }
    }

    #[test]
    fn adds_extension_to_empty_card() {
        let base = serde_json::json!({"name": "echo"});
        let card = build_payment_agent_card(&base, &metadata()).unwrap();
        let extensions = card["capabilities"]["extensions"].as_array().unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0]["uri"], "urn:nevermined:payment");
        assert_eq!(extensions[0]["params"]["credits"], 5);
    }

    #[test]
    fn appends_to_existing_extensions() {
        let base = serde_json::json!({"capabilities": {"extensions": [{"uri": "urn:other"}]}});
        let card = build_payment_agent_card(&base, &metadata()).unwrap();
        let extensions = card["capabilities"]["extensions"].as_array().unwrap();
        assert_eq!(extensions.len(), 2);
    }

    #[test]
    fn rejects_missing_agent_id() {
        let base = serde_json::json!({});
        let mut meta = metadata();
        meta.agent_id = String::new();
        assert!(matches!(build_payment_agent_card(&base, &meta), Err(AgentCardError::MissingAgentId)));
    }

    #[test]
    fn rejects_zero_credits_on_non_trial_plan() {
        let base = serde_json::json!({});
        let mut meta = metadata();
        meta.credits = 0;
        assert!(matches!(build_payment_agent_card(&base, &meta), Err(AgentCardError::NonPositiveCredits)));
    }

    #[test]
    fn allows_zero_credits_on_trial_plan() {
        let base = serde_json::json!({});
        let mut meta = metadata();
        meta.credits = 0;
        meta.is_trial_plan = Some(true);
        assert!(build_payment_agent_card(&base, &meta).is_ok());
    }
}
