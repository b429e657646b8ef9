//! The x402-HTTP payment gate: a single [`tower::Layer`] covering every
//! route in a [`RouteTable`], rather than one per-route layer.
//!
//! For each matched request: extract the bearer token from the
//! `payment-signature` header, verify it against the facilitator, forward
//! to the inner service, then settle and attach the `payment-response`
//! header before the response is emitted. A settlement failure is recorded
//! but does not prevent the (already-produced) response from reaching the
//! caller.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use tower::{Layer, Service};

use paywall_core::facilitator::{FacilitatorClient, build_payment_required};
use paywall_core::types::PaymentRequired;

use crate::error::{HeaderCodecError, PaygateError};
use crate::route_table::{RouteConfig, RouteTable};

const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";
const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
const PAYMENT_RESPONSE_HEADER: &str = "payment-response";

/// Builds [`X402MiddlewareService`] for every inner service it wraps.
#[derive(Clone)]
pub struct X402Layer {
    facilitator: Arc<FacilitatorClient>,
    routes: Arc<RouteTable>,
    default_agent_id: Arc<str>,
}

impl X402Layer {
    /// Creates a layer enforcing payment for every route in `routes`,
    /// verifying/settling against `facilitator`. `default_agent_id` is used
    /// for routes that don't override `agentId`.
    #[must_use]
    pub fn new(facilitator: FacilitatorClient, routes: RouteTable, default_agent_id: impl Into<String>) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            routes: Arc::new(routes),
            default_agent_id: Arc::from(default_agent_id.into()),
        }
    }
}

impl<S> Layer<S> for X402Layer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Service = X402MiddlewareService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            facilitator: Arc::clone(&self.facilitator),
            routes: Arc::clone(&self.routes),
            default_agent_id: Arc::clone(&self.default_agent_id),
            inner,
        }
    }
}

/// The `Service` produced by [`X402Layer`].
#[derive(Clone)]
pub struct X402MiddlewareService<S> {
    facilitator: Arc<FacilitatorClient>,
    routes: Arc<RouteTable>,
    default_agent_id: Arc<str>,
    inner: S,
}

impl<S> Service<Request> for X402MiddlewareService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let facilitator = Arc::clone(&self.facilitator);
        let routes = Arc::clone(&self.routes);
        let default_agent_id = Arc::clone(&self.default_agent_id);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let method = req.method().as_str().to_owned();
            let path = req.uri().path().to_owned();

            let Some(route) = routes.match_route(&method, &path).cloned() else {
                return inner.call(req).await;
            };

            let agent_id = route.agent_id.clone().unwrap_or_else(|| default_agent_id.to_string());
            let payment_required =
                build_payment_required(&route.plan_id, &path, &agent_id, &method, route.network.as_deref(), None);

            match handle_protected(&facilitator, &route, &payment_required, req, &mut inner).await {
                Ok(response) => Ok(response),
                Err(err) => Ok(paygate_error_response(&err, &payment_required)),
            }
        })
    }
}

async fn handle_protected<S>(
    facilitator: &FacilitatorClient,
    route: &RouteConfig,
    payment_required: &PaymentRequired,
    req: Request,
    inner: &mut S,
) -> Result<Response, PaygateError>
where
    S: Service<Request, Response = Response, Error = Infallible>,
{
    let token = extract_bearer(req.headers()).ok_or(PaygateError::MissingBearer)?;

    let verify = facilitator.verify_permissions(payment_required, &token, route.credits).await?;
    if !verify.is_valid {
        return Err(PaygateError::Invalid(verify.invalid_reason.unwrap_or_else(|| "invalid".to_owned())));
    }

    let response = match inner.call(req).await {
        Ok(response) => response,
        Err(err) => match err {},
    };

    if response.status().is_client_error() || response.status().is_server_error() {
        return Ok(response);
    }

    let mut response = response;
    match facilitator.settle_permissions(payment_required, &token, route.credits, None, None, None).await {
        Ok(settlement) => {
            if let Ok(header_value) = encode_header(&settlement) {
                response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, header_value);
            }
        }
        Err(err) => {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, "settlement failed after a successful response");
            #[cfg(not(feature = "telemetry"))]
            let _ = err;
        }
    }
    Ok(response)
}

/// Strips an optional `Bearer ` prefix from the `payment-signature` header,
/// matching the `Authorization` header convention used elsewhere.
fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    let raw = headers.get(PAYMENT_SIGNATURE_HEADER)?.to_str().ok()?;
    let trimmed = raw.trim();
    let token = trimmed.strip_prefix("Bearer ").or_else(|| trimmed.strip_prefix("bearer ")).unwrap_or(trimmed);
    if token.is_empty() { None } else { Some(token.to_owned()) }
}

fn encode_header<T: Serialize>(value: &T) -> Result<HeaderValue, HeaderCodecError> {
    let json = serde_json::to_vec(value)?;
    let encoded = BASE64.encode(json);
    HeaderValue::from_str(&encoded).map_err(|_| HeaderCodecError::Utf8)
}

fn paygate_error_response(err: &PaygateError, payment_required: &PaymentRequired) -> Response {
    match err {
        PaygateError::MissingBearer | PaygateError::Invalid(_) => {
            let mut builder = Response::builder().status(StatusCode::PAYMENT_REQUIRED);
            if let Ok(header_value) = encode_header(payment_required) {
                builder = builder.header(PAYMENT_REQUIRED_HEADER, header_value);
            }
            builder.body(axum_core::body::Body::empty()).unwrap_or_else(|_| StatusCode::PAYMENT_REQUIRED.into_response())
        }
        PaygateError::Facilitator(_) | PaygateError::Settlement(_) | PaygateError::Header(_) => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum_core::body::Body;
    use http::Request as HttpRequest;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::route_table::RouteConfig;

    #[derive(Clone)]
    struct Echo;

    impl Service<Request> for Echo {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request) -> Self::Future {
            Box::pin(async { Ok(StatusCode::OK.into_response()) })
        }
    }

    fn table() -> RouteTable {
        RouteTable::new(HashMap::from([(
            "GET /weather".to_owned(),
            RouteConfig { plan_id: "plan-1".to_owned(), credits: Some(2), agent_id: None, network: None },
        )]))
    }

    #[tokio::test]
    async fn unmatched_route_bypasses_the_gate() {
        let facilitator = FacilitatorClient::new("http://localhost".parse().unwrap());
        let layer = X402Layer::new(facilitator, table(), "agent-1");
        let svc = layer.layer(Echo);

        let req = HttpRequest::builder().uri("/unprotected").body(Body::empty()).unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_bearer_yields_402_with_payment_required_header() {
        let facilitator = FacilitatorClient::new("http://localhost".parse().unwrap());
        let layer = X402Layer::new(facilitator, table(), "agent-1");
        let svc = layer.layer(Echo);

        let req = HttpRequest::builder().method("GET").uri("/weather").body(Body::empty()).unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert!(response.headers().contains_key(PAYMENT_REQUIRED_HEADER));
    }

    #[tokio::test]
    async fn valid_payment_settles_and_attaches_response_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/permissions/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "isValid": true })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/permissions/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
            .mount(&server)
            .await;

        let facilitator = FacilitatorClient::new(server.uri().parse().unwrap());
        let layer = X402Layer::new(facilitator, table(), "agent-1");
        let svc = layer.layer(Echo);

        let req = HttpRequest::builder()
            .method("GET")
            .uri("/weather")
            .header(PAYMENT_SIGNATURE_HEADER, "token-abc")
            .body(Body::empty())
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(PAYMENT_RESPONSE_HEADER));
    }

    #[tokio::test]
    async fn invalid_payment_yields_402() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/permissions/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "isValid": false, "invalidReason": "expired" }),
            ))
            .mount(&server)
            .await;

        let facilitator = FacilitatorClient::new(server.uri().parse().unwrap());
        let layer = X402Layer::new(facilitator, table(), "agent-1");
        let svc = layer.layer(Echo);

        let req = HttpRequest::builder()
            .method("GET")
            .uri("/weather")
            .header(PAYMENT_SIGNATURE_HEADER, "token-abc")
            .body(Body::empty())
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}
