//! JSON-RPC 2.0 client for a single A2A agent, with bearer-token auth and
//! SSE streaming for the methods that support it.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use crate::error::A2aError;
use crate::sse::SseDecoder;

/// A stream of JSON-RPC results produced by a streaming A2A method.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<Value, A2aError>> + Send>>;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// An A2A client scoped to one `(agentBaseUrl, agentId, planId)` tuple.
///
/// Holds its own access token, refreshed via [`PaymentsClient::set_token`]
/// and discarded via [`PaymentsClient::clear_token`] — typically after a
/// `401`, so the next call forces the caller to mint a fresh one.
#[derive(Debug)]
pub struct PaymentsClient {
    http: reqwest::Client,
    base_url: Url,
    agent_card: Value,
    token: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl PaymentsClient {
    pub(crate) fn new(http: reqwest::Client, base_url: Url, agent_card: Value) -> Self {
        Self { http, base_url, agent_card, token: RwLock::new(None), next_id: AtomicU64::new(1) }
    }

    /// The agent card fetched when this client was first created.
    #[must_use]
    pub const fn agent_card(&self) -> &Value {
        &self.agent_card
    }

    /// `true` when the agent card advertises `capabilities.streaming`.
    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.agent_card.get("capabilities").and_then(|c| c.get("streaming")).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Sets the bearer token used for subsequent requests.
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    /// Clears the cached token, forcing the next call to fail validation
    /// until [`PaymentsClient::set_token`] is called again.
    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    fn next_request_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn bearer(&self) -> Result<String, A2aError> {
        self.token.read().await.clone().ok_or(A2aError::InvalidToken)
    }

    async fn call_unary(&self, method: &str, params: Value) -> Result<Value, A2aError> {
        let token = self.bearer().await?;
        let id = self.next_request_id();
        let body = JsonRpcRequest { jsonrpc: "2.0", id: &id, method, params };

        let response = self
            .http
            .post(self.base_url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(A2aError::Backend { status, message });
        }

        let parsed: JsonRpcResponse = response.json().await?;
        finish_response(parsed, &id)
    }

    /// `message/send`.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError`] on transport failure, a non-2xx response, or a
    /// JSON-RPC error member.
    pub async fn send_message(&self, params: Value) -> Result<Value, A2aError> {
        self.call_unary("message/send", params).await
    }

    /// `tasks/get`.
    ///
    /// # Errors
    ///
    /// See [`PaymentsClient::send_message`].
    pub async fn get_task(&self, params: Value) -> Result<Value, A2aError> {
        self.call_unary("tasks/get", params).await
    }

    /// `tasks/pushNotificationConfig/set`.
    ///
    /// # Errors
    ///
    /// See [`PaymentsClient::send_message`].
    pub async fn set_task_push_notification_config(&self, params: Value) -> Result<Value, A2aError> {
        self.call_unary("tasks/pushNotificationConfig/set", params).await
    }

    /// `tasks/pushNotificationConfig/get`.
    ///
    /// # Errors
    ///
    /// See [`PaymentsClient::send_message`].
    pub async fn get_task_push_notification_config(&self, params: Value) -> Result<Value, A2aError> {
        self.call_unary("tasks/pushNotificationConfig/get", params).await
    }

    async fn call_streaming(self: &Arc<Self>, method: &str, params: Value) -> Result<ResultStream, A2aError> {
        if !self.supports_streaming() {
            return Err(A2aError::StreamingNotSupported);
        }
        let token = self.bearer().await?;
        let id = self.next_request_id();
        let body = JsonRpcRequest { jsonrpc: "2.0", id: &id, method, params };

        let response = self
            .http
            .post(self.base_url.clone())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(A2aError::Backend { status, message });
        }

        let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            return Err(A2aError::StreamProtocol(format!("expected text/event-stream, got {content_type:?}")));
        }

        Ok(Box::pin(sse_value_stream(response, id)))
    }

    /// `message/stream`. Requires `capabilities.streaming` on the agent card.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::StreamingNotSupported`] when the agent card does
    /// not advertise streaming, or the errors listed under
    /// [`PaymentsClient::send_message`].
    pub async fn send_message_stream(self: &Arc<Self>, params: Value) -> Result<ResultStream, A2aError> {
        self.call_streaming("message/stream", params).await
    }

    /// `tasks/resubscribe`. Requires `capabilities.streaming` on the agent card.
    ///
    /// # Errors
    ///
    /// See [`PaymentsClient::send_message_stream`].
    pub async fn resubscribe_task(self: &Arc<Self>, params: Value) -> Result<ResultStream, A2aError> {
        self.call_streaming("tasks/resubscribe", params).await
    }
}

fn finish_response(parsed: JsonRpcResponse, expected_id: &str) -> Result<Value, A2aError> {
    let got_id = parsed.id.as_str().map(str::to_owned).unwrap_or_else(|| parsed.id.to_string());
    if got_id != expected_id {
        return Err(A2aError::StreamProtocol(format!("response id {got_id} does not match request id {expected_id}")));
    }
    if let Some(error) = parsed.error {
        return Err(A2aError::RpcError { code: error.code, message: error.message });
    }
    Ok(parsed.result.unwrap_or(Value::Null))
}

fn sse_value_stream(response: reqwest::Response, request_id: String) -> impl Stream<Item = Result<Value, A2aError>> {
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(A2aError::Network(err));
                    return;
                }
            };
            for event in decoder.feed(&chunk) {
                let parsed: Result<JsonRpcResponse, _> = serde_json::from_str(&event);
                match parsed {
                    Ok(parsed) => yield finish_response(parsed, &request_id),
                    Err(err) => yield Err(A2aError::StreamProtocol(err.to_string())),
                }
            }
        }
    }
}
