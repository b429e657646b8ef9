//! Facilitator HTTP client: verify, settle, and the observability/redeem
//! endpoints, plus the plan-metadata scheme cache.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::rpc::{RpcError, ToRpcError};
use crate::types::{AcceptedExtra, AcceptedPayment, PaymentRequired, ResourceInfo, SettleResult, StartAgentRequest, VerifyResult};

/// Default payment scheme used when plan-metadata lookup fails.
pub const DEFAULT_SCHEME: &str = "nvm:erc4337";

/// TTL for the `planId -> scheme` metadata cache.
pub const PLAN_SCHEME_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// How many times `finish_simulation_request`/`redeem_simulate` retry on
/// failure.
pub const SIMULATION_RETRIES: u32 = 3;

/// Fixed delay between simulation retries.
pub const SIMULATION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors raised while talking to the facilitator backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorError {
    /// The HTTP transport itself failed (DNS, connect, timeout).
    #[error("network error calling facilitator: {0}")]
    Network(#[from] reqwest::Error),
    /// The facilitator responded with a non-2xx status.
    #[error("facilitator backend error {status}: {message}")]
    Backend {
        /// The HTTP status code returned.
        status: StatusCode,
        /// The server-supplied error message, if any.
        message: String,
    },
}

impl ToRpcError for FacilitatorError {
    fn to_rpc_error(&self) -> RpcError {
        RpcError::payment_required(self.to_string(), "invalid")
    }
}

struct SchemeCacheEntry {
    scheme: String,
    expires_at: tokio::time::Instant,
}

/// A `planId -> scheme` cache with a fixed TTL.
///
/// Stale entries may be recomputed by concurrent readers without harm; a
/// miss simply falls back to [`DEFAULT_SCHEME`].
#[derive(Default)]
pub struct PlanSchemeCache {
    state: RwLock<HashMap<String, SchemeCacheEntry>>,
}

impl PlanSchemeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached scheme for `plan_id`, if present and unexpired.
    pub async fn get(&self, plan_id: &str) -> Option<String> {
        let guard = self.state.read().await;
        let entry = guard.get(plan_id)?;
        (tokio::time::Instant::now() < entry.expires_at).then(|| entry.scheme.clone())
    }

    /// Stores `scheme` for `plan_id` with the default TTL.
    pub async fn set(&self, plan_id: &str, scheme: String) {
        let mut guard = self.state.write().await;
        guard.insert(
            plan_id.to_owned(),
            SchemeCacheEntry {
                scheme,
                expires_at: tokio::time::Instant::now() + PLAN_SCHEME_CACHE_TTL,
            },
        );
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestBody<'a> {
    payment_required: &'a PaymentRequired,
    x402_access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_amount: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequestBody<'a> {
    payment_required: &'a PaymentRequired,
    x402_access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    margin_percent: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartProcessingBody<'a> {
    access_token: &'a str,
    endpoint: &'a str,
    http_verb: &'a str,
    batch: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedeemBody<'a> {
    agent_request_id: &'a str,
    plan_id: &'a str,
    redeem_from: &'a str,
    amount: u64,
    batch: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemResult {
    tx_hash: String,
    success: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanSummaryWire {
    plan_id: String,
    #[serde(default)]
    plan_name: Option<String>,
}

/// HTTP client for the facilitator's verify/settle/observability endpoints.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    client: Client,
}

impl FacilitatorClient {
    /// Builds a client against `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// `POST <backend>/api/v1/permissions/verify`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport failure or a non-2xx
    /// response.
    pub async fn verify_permissions(
        &self,
        payment_required: &PaymentRequired,
        access_token: &str,
        max_amount: Option<u64>,
    ) -> Result<VerifyResult, FacilitatorError> {
        self.post_json(
            "api/v1/permissions/verify",
            &VerifyRequestBody {
                payment_required,
                x402_access_token: access_token,
                max_amount,
            },
        )
        .await
    }

    /// `POST <backend>/api/v1/permissions/settle`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport failure or a non-2xx
    /// response.
    #[allow(clippy::too_many_arguments)]
    pub async fn settle_permissions(
        &self,
        payment_required: &PaymentRequired,
        access_token: &str,
        max_amount: Option<u64>,
        agent_request_id: Option<&str>,
        batch: Option<bool>,
        margin_percent: Option<f64>,
    ) -> Result<SettleResult, FacilitatorError> {
        self.post_json(
            "api/v1/permissions/settle",
            &SettleRequestBody {
                payment_required,
                x402_access_token: access_token,
                max_amount,
                agent_request_id,
                batch,
                margin_percent,
            },
        )
        .await
    }

    /// `POST <backend>/api/v1/agents/:agentId/initialize`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport failure or a non-2xx
    /// response.
    pub async fn start_processing_request(
        &self,
        agent_id: &str,
        access_token: &str,
        url_requested: &str,
        http_verb: &str,
        batch: bool,
    ) -> Result<StartAgentRequest, FacilitatorError> {
        self.post_json(
            &format!("api/v1/agents/{agent_id}/initialize"),
            &StartProcessingBody {
                access_token,
                endpoint: url_requested,
                http_verb,
                batch,
            },
        )
        .await
    }

    /// `POST <backend>/api/v1/agents/redeem`.
    ///
    /// The access token is decoded to extract the subscriber wallet and plan
    /// before the redeem call is issued.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport failure or a non-2xx
    /// response, or a synthetic [`FacilitatorError::Backend`] if the access
    /// token cannot be decoded.
    pub async fn redeem_credits_from_request(
        &self,
        agent_request_id: &str,
        access_token: &str,
        credits_to_burn: u64,
        batch: bool,
    ) -> Result<(String, bool), FacilitatorError> {
        let decoded = crate::token::decode(access_token).map_err(|e| FacilitatorError::Backend {
            status: StatusCode::BAD_REQUEST,
            message: e.to_string(),
        })?;
        let plan_id = decoded.accepted_plan_id.unwrap_or_default();
        let redeem_from = decoded.subscriber_address.unwrap_or_default();

        let result: RedeemResult = self
            .post_json(
                "api/v1/agents/redeem",
                &RedeemBody {
                    agent_request_id,
                    plan_id: &plan_id,
                    redeem_from: &redeem_from,
                    amount: credits_to_burn,
                    batch,
                },
            )
            .await?;
        Ok((result.tx_hash, result.success))
    }

    /// `GET <backend>/api/v1/agents/:agentId/plans` — best-effort plan
    /// listing used by the auth resolver to enumerate options in denial
    /// messages. Not part of the facilitator's settlement surface proper.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport failure or a non-2xx
    /// response.
    pub async fn list_agent_plans(&self, agent_id: &str) -> Result<Vec<crate::auth::PlanSummary>, FacilitatorError> {
        let url = self
            .base_url
            .join(&format!("api/v1/agents/{agent_id}/plans"))
            .map_err(|e| FacilitatorError::Backend {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("invalid facilitator path: {e}"),
            })?;
        let response = self.client.get(url).send().await?;
        if response.status().is_success() {
            let plans: Vec<PlanSummaryWire> = response.json().await?;
            Ok(plans
                .into_iter()
                .map(|p| crate::auth::PlanSummary {
                    plan_id: p.plan_id,
                    plan_name: p.plan_name,
                })
                .collect())
        } else {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            Err(FacilitatorError::Backend { status, message })
        }
    }

    /// `POST <backend>/api/v1/requests/simulate`, retried up to
    /// [`SIMULATION_RETRIES`] times with a fixed [`SIMULATION_RETRY_DELAY`].
    ///
    /// # Errors
    ///
    /// Returns the last [`FacilitatorError`] encountered once retries are
    /// exhausted.
    pub async fn finish_simulation_request(
        &self,
        payment_required: &PaymentRequired,
        access_token: &str,
    ) -> Result<VerifyResult, FacilitatorError> {
        self.with_simulation_retries(|| {
            self.post_json(
                "api/v1/requests/simulate",
                &VerifyRequestBody {
                    payment_required,
                    x402_access_token: access_token,
                    max_amount: None,
                },
            )
        })
        .await
    }

    /// `POST <backend>/api/v1/requests/redeem-simulate`, retried up to
    /// [`SIMULATION_RETRIES`] times with a fixed [`SIMULATION_RETRY_DELAY`].
    ///
    /// # Errors
    ///
    /// Returns the last [`FacilitatorError`] encountered once retries are
    /// exhausted.
    pub async fn redeem_simulate(
        &self,
        payment_required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
    ) -> Result<SettleResult, FacilitatorError> {
        self.with_simulation_retries(|| {
            self.post_json(
                "api/v1/requests/redeem-simulate",
                &VerifyRequestBody {
                    payment_required,
                    x402_access_token: access_token,
                    max_amount: Some(max_amount),
                },
            )
        })
        .await
    }

    async fn with_simulation_retries<T, F, Fut>(&self, mut call: F) -> Result<T, FacilitatorError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FacilitatorError>>,
    {
        let mut last_err = None;
        for attempt in 0..SIMULATION_RETRIES {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(attempt, error = %err, "simulation request failed, retrying");
                    last_err = Some(err);
                    if attempt + 1 < SIMULATION_RETRIES {
                        tokio::time::sleep(SIMULATION_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    async fn post_json<T, R>(&self, path: &str, body: &T) -> Result<R, FacilitatorError>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = self.base_url.join(path).map_err(|e| FacilitatorError::Backend {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("invalid facilitator path {path}: {e}"),
        })?;
        let response = self.client.post(url).json(body).send().await?;
        if response.status().is_success() {
            Ok(response.json::<R>().await?)
        } else {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            Err(FacilitatorError::Backend { status, message })
        }
    }
}

/// Pure function building a `PaymentRequired` v2 challenge.
///
/// `scheme` defaults to [`DEFAULT_SCHEME`] when not supplied.
#[must_use]
pub fn build_payment_required(
    plan_id: &str,
    endpoint: &str,
    agent_id: &str,
    http_verb: &str,
    network: Option<&str>,
    scheme: Option<&str>,
) -> PaymentRequired {
    PaymentRequired {
        x402_version: PaymentRequired::VERSION,
        resource: ResourceInfo {
            url: endpoint.to_owned(),
            description: None,
        },
        accepts: vec![AcceptedPayment {
            scheme: scheme.unwrap_or(DEFAULT_SCHEME).to_owned(),
            network: network.unwrap_or_default().to_owned(),
            plan_id: plan_id.to_owned(),
            extra: Some(AcceptedExtra {
                agent_id: Some(agent_id.to_owned()),
                http_verb: Some(http_verb.to_owned()),
                version: Some(PaymentRequired::VERSION.to_string()),
            }),
        }],
        extensions: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn verify_permissions_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/permissions/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isValid": true,
                "payer": "0xabc",
                "agentRequestId": "r1",
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(server.uri().parse().unwrap());
        let challenge = build_payment_required("p1", "mcp://srv/tools/echo", "did:nv:agent", "POST", None, None);
        let result = client.verify_permissions(&challenge, "tok", None).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.payer.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn backend_error_maps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/permissions/verify"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(server.uri().parse().unwrap());
        let challenge = build_payment_required("p1", "mcp://srv/tools/echo", "did:nv:agent", "POST", None, None);
        let err = client.verify_permissions(&challenge, "tok", None).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::Backend { .. }));
    }

    #[tokio::test]
    async fn plan_scheme_cache_round_trips() {
        let cache = PlanSchemeCache::new();
        assert!(cache.get("p1").await.is_none());
        cache.set("p1", "nvm:erc4337".to_owned()).await;
        assert_eq!(cache.get("p1").await.as_deref(), Some("nvm:erc4337"));
    }

    #[test]
    fn build_payment_required_defaults_scheme() {
        let pr = build_payment_required("p1", "mcp://srv/tools/echo", "did:nv:agent", "POST", None, None);
        assert_eq!(pr.accepts[0].scheme, DEFAULT_SCHEME);
    }
}
