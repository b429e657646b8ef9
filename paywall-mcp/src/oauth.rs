//! OAuth discovery router (C9): static metadata endpoints plus dynamic
//! client registration.
//!
//! No dynamic OAuth state is kept; every handler here returns a fixed JSON
//! document derived from the server's public base URL. Fields follow
//! RFC 8414 (authorization server metadata), RFC 9728 (protected resource
//! metadata), and RFC 7591 (dynamic client registration).

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};

/// Shared state for the OAuth discovery router: just the externally visible
/// base URL the metadata documents should advertise.
#[derive(Debug, Clone)]
pub struct OAuthState {
    /// The public base URL of this MCP server, e.g. `https://mcp.example.com`.
    pub base_url: String,
}

/// Builds the OAuth discovery router.
///
/// Routes: `/.well-known/oauth-authorization-server`,
/// `/.well-known/oauth-protected-resource`, `/.well-known/openid-configuration`,
/// `/register`, `/health`, `/`.
#[must_use]
pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata))
        .route("/.well-known/oauth-protected-resource", get(protected_resource_metadata))
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .route("/register", post(register_client))
        .route("/health", get(health))
        .route("/", get(root))
        .with_state(state)
}

async fn authorization_server_metadata(State(state): State<OAuthState>) -> Json<Value> {
    let base = &state.base_url;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "registration_endpoint": format!("{base}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"],
    }))
}

async fn protected_resource_metadata(State(state): State<OAuthState>) -> Json<Value> {
    let base = &state.base_url;
    Json(json!({
        "resource": format!("{base}/mcp"),
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
    }))
}

async fn openid_configuration(State(state): State<OAuthState>) -> Json<Value> {
    let base = &state.base_url;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
    }))
}

async fn register_client(State(state): State<OAuthState>, Json(body): Json<Value>) -> Json<Value> {
    let client_name = body.get("client_name").and_then(Value::as_str).unwrap_or("mcp-client");
    let redirect_uris = body.get("redirect_uris").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
    Json(json!({
        "client_id": uuid::Uuid::new_v4().to_string(),
        "client_name": client_name,
        "redirect_uris": redirect_uris,
        "token_endpoint_auth_method": "none",
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "client_id_issued_at": 0,
        "issuer": state.base_url,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn root() -> Json<Value> {
    Json(json!({ "name": "paywall-mcp" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> OAuthState {
        OAuthState { base_url: "https://mcp.example.com".to_owned() }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state());
        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn authorization_server_metadata_includes_issuer() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["issuer"], "https://mcp.example.com");
    }

    #[tokio::test]
    async fn register_echoes_client_name() {
        let app = router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"client_name":"demo"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["client_name"], "demo");
    }
}
