//! Client registry (C11): hands out one [`PaymentsClient`] per distinct
//! `(agentBaseUrl, agentId, planId)` tuple, fetching the agent's discovery
//! card the first time that tuple is requested.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use url::Url;

use crate::client::PaymentsClient;
use crate::error::A2aError;

/// The tuple a client is cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    agent_base_url: String,
    agent_id: String,
    plan_id: String,
}

/// The parameters identifying a client to fetch or create.
#[derive(Debug, Clone)]
pub struct GetClientRequest {
    /// The base URL the agent's JSON-RPC endpoint is reachable at.
    pub agent_base_url: String,
    /// The agent being addressed.
    pub agent_id: String,
    /// The plan this client's calls are billed against.
    pub plan_id: String,
    /// Path (relative to `agent_base_url`, or absolute) to the agent's
    /// discovery card. Defaults to `.well-known/agent.json`.
    pub agent_card_path: Option<String>,
}

/// Caches one [`PaymentsClient`] per `(agentBaseUrl, agentId, planId)` tuple.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: DashMap<RegistryKey, Arc<PaymentsClient>>,
    http: reqwest::Client,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { clients: DashMap::new(), http: reqwest::Client::new() }
    }

    /// Returns the cached client for `request`'s tuple, fetching the
    /// agent's discovery card and creating it on first request.
    ///
    /// Concurrent first requests for the same tuple race only on the
    /// agent-card fetch; `DashMap::entry` resolves the winner, so every
    /// caller ends up holding the same [`Arc<PaymentsClient>`].
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::Validation`] if any required field is empty, or
    /// a transport/backend error from fetching the agent card.
    pub async fn get_client(&self, request: GetClientRequest) -> Result<Arc<PaymentsClient>, A2aError> {
        if request.agent_base_url.is_empty() {
            return Err(A2aError::Validation { field: "agentBaseUrl" });
        }
        if request.agent_id.is_empty() {
            return Err(A2aError::Validation { field: "agentId" });
        }
        if request.plan_id.is_empty() {
            return Err(A2aError::Validation { field: "planId" });
        }

        let key = RegistryKey {
            agent_base_url: request.agent_base_url.clone(),
            agent_id: request.agent_id.clone(),
            plan_id: request.plan_id.clone(),
        };

        if let Some(existing) = self.clients.get(&key) {
            return Ok(Arc::clone(&existing));
        }

        let base_url: Url = request.agent_base_url.parse().map_err(|_| A2aError::Validation { field: "agentBaseUrl" })?;
        let agent_card = fetch_agent_card(&self.http, &base_url, request.agent_card_path.as_deref()).await?;
        let client = Arc::new(PaymentsClient::new(self.http.clone(), base_url, agent_card));

        let entry = self.clients.entry(key).or_insert_with(|| client);
        Ok(Arc::clone(&entry))
    }

    /// Number of distinct clients currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when no clients are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

async fn fetch_agent_card(http: &reqwest::Client, base_url: &Url, path: Option<&str>) -> Result<Value, A2aError> {
    let url = match path {
        Some(path) => base_url.join(path).map_err(|_| A2aError::Validation { field: "agentCardPath" })?,
        None => base_url.join(".well-known/agent.json").map_err(|_| A2aError::Validation { field: "agentBaseUrl" })?,
    };
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        return Err(A2aError::Backend { status, message });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(base_url: &str) -> GetClientRequest {
        GetClientRequest {
            agent_base_url: base_url.to_owned(),
            agent_id: "agent-1".to_owned(),
            plan_id: "plan-1".to_owned(),
            agent_card_path: None,
        }
    }

    #[tokio::test]
    async fn rejects_empty_fields() {
        let registry = ClientRegistry::new();
        let mut req = request("http://localhost");
        req.plan_id = String::new();
        assert!(matches!(registry.get_client(req).await, Err(A2aError::Validation { field: "planId" })));
    }

    #[tokio::test]
    async fn returns_the_same_client_for_the_same_tuple() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/agent.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "demo"})))
            .mount(&server)
            .await;

        let registry = ClientRegistry::new();
        let first = registry.get_client(request(&server.uri())).await.unwrap();
        let second = registry.get_client(request(&server.uri())).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn different_plan_ids_yield_different_clients() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/agent.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "demo"})))
            .mount(&server)
            .await;

        let registry = ClientRegistry::new();
        let mut other = request(&server.uri());
        other.plan_id = "plan-2".to_owned();

        let first = registry.get_client(request(&server.uri())).await.unwrap();
        let second = registry.get_client(other).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 2);
    }
}
