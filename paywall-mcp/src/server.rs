//! MCP server manager (C8): registration, the session-managed JSON-RPC
//! handler, and the `Idle -> Starting -> Running -> Stopping -> Idle`
//! lifecycle.
//!
//! Every registered handler is wrapped with [`paywall_core::engine::PaywallEngine`]
//! at dispatch time, not at registration time: registration only stores the
//! raw handler and its [`PaywallOptions`], so the same [`McpServerManager`]
//! can be started, stopped, and started again against a fresh listener
//! without re-registering anything.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Json as JsonExtractor, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use paywall_core::engine::{CallOutcome, PaywallEngine, PaywallError};
use paywall_core::types::HandlerKind;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::oauth::{self, OAuthState};
use crate::session::SessionManager;
use crate::types::{is_uri_template, Handler, RegisteredPrompt, RegisteredResource, RegisteredTool, ServerState};

struct Registry {
    tools: HashMap<String, RegisteredTool>,
    resources: HashMap<String, RegisteredResource>,
    prompts: HashMap<String, RegisteredPrompt>,
}

impl Registry {
    const fn new() -> Self {
        Self { tools: HashMap::new(), resources: HashMap::new(), prompts: HashMap::new() }
    }
}

/// Owns registrations, the paywall engine, and the running listener (if
/// any) for one MCP server.
pub struct McpServerManager {
    engine: Arc<PaywallEngine>,
    state: Mutex<ServerState>,
    registry: Mutex<Registry>,
    sessions: Arc<SessionManager>,
    shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl McpServerManager {
    /// Creates a new, `Idle` server manager bound to `engine`.
    #[must_use]
    pub fn new(engine: PaywallEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            state: Mutex::new(ServerState::Idle),
            registry: Mutex::new(Registry::new()),
            sessions: Arc::new(SessionManager::new()),
            shutdown: Mutex::new(None),
        }
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> ServerState {
        *self.state.lock().await
    }

    /// Registers a tool. Legal only while [`ServerState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotIdle`] if called outside `Idle`.
    pub async fn register_tool(
        &self,
        name: impl Into<String>,
        input_schema: Option<Value>,
        options: paywall_core::engine::PaywallOptions,
        handler: Handler,
    ) -> Result<(), McpError> {
        self.require_idle().await?;
        let name = name.into();
        let mut registry = self.registry.lock().await;
        registry.tools.insert(name.clone(), RegisteredTool { name, input_schema, options, handler });
        Ok(())
    }

    /// Registers a resource or resource template (detected by the presence
    /// of a `{...}` placeholder in `uri`). Legal only while `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotIdle`] if called outside `Idle`.
    pub async fn register_resource(
        &self,
        uri: impl Into<String>,
        options: paywall_core::engine::PaywallOptions,
        handler: Handler,
    ) -> Result<(), McpError> {
        self.require_idle().await?;
        let uri = uri.into();
        let is_template = is_uri_template(&uri);
        let mut registry = self.registry.lock().await;
        registry.resources.insert(uri.clone(), RegisteredResource { uri, is_template, options, handler });
        Ok(())
    }

    /// Registers a prompt. Legal only while `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotIdle`] if called outside `Idle`.
    pub async fn register_prompt(
        &self,
        name: impl Into<String>,
        options: paywall_core::engine::PaywallOptions,
        handler: Handler,
    ) -> Result<(), McpError> {
        self.require_idle().await?;
        let name = name.into();
        let mut registry = self.registry.lock().await;
        registry.prompts.insert(name.clone(), RegisteredPrompt { name, options, handler });
        Ok(())
    }

    async fn require_idle(&self) -> Result<(), McpError> {
        let state = *self.state.lock().await;
        if state == ServerState::Idle {
            Ok(())
        } else {
            Err(McpError::NotIdle)
        }
    }

    /// Validates `config`, installs the middleware chain, binds a TCP
    /// listener, and transitions to [`ServerState::Running`].
    ///
    /// Middleware order: HTTP logging -> CORS -> OAuth discovery router
    /// (C9) -> session-managed JSON-RPC handler at `/mcp` -> 404 fallback.
    /// Every inbound request is wrapped in [`paywall_core::request_context::run`]
    /// before the JSON-RPC handler dispatches to a registered handler.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidTransition`] if not currently `Idle`,
    /// [`McpError::MissingAgentId`] if `config.agent_id` is empty, or
    /// [`McpError::Bind`] if the listener cannot be bound.
    pub async fn start(self: &Arc<Self>, config: &McpServerConfig) -> Result<SocketAddr, McpError> {
        {
            let mut state = self.state.lock().await;
            if *state != ServerState::Idle {
                return Err(McpError::InvalidTransition { current: state.label() });
            }
            *state = ServerState::Starting;
        }

        if config.agent_id.is_empty() {
            *self.state.lock().await = ServerState::Idle;
            return Err(McpError::MissingAgentId);
        }

        let base_url = format!("http://{}:{}", config.host, config.port);
        let app_state = AppState { manager: Arc::clone(self) };
        let mcp_router = Router::new().route("/mcp", post(handle_rpc)).with_state(app_state);
        let app = mcp_router
            .merge(oauth::router(OAuthState { base_url }))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .fallback(not_found);

        let addr = SocketAddr::new(config.host, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| McpError::Bind { addr: addr.to_string(), source })?;
        let bound_addr = listener.local_addr().map_err(|source| McpError::Bind { addr: addr.to_string(), source })?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.shutdown.lock().await = Some(tx);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            manager.sessions.clear();
        });

        *self.state.lock().await = ServerState::Running;
        Ok(bound_addr)
    }

    /// Destroys all sessions, closes the listener, and resets to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidTransition`] if not currently `Running`.
    pub async fn stop(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.lock().await;
            if *state != ServerState::Running {
                return Err(McpError::InvalidTransition { current: state.label() });
            }
            *state = ServerState::Stopping;
        }

        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        self.sessions.clear();
        *self.state.lock().await = ServerState::Idle;
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    manager: Arc<McpServerManager>,
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, JsonExtractor(body): JsonExtractor<Value>) -> Response {
    let ctx = request_context_from_headers(&headers);
    paywall_core::request_context::run(ctx, dispatch(state, body)).await
}

fn request_context_from_headers(headers: &HeaderMap) -> paywall_core::request_context::RequestContext {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_ascii_lowercase(), value.to_owned());
        }
    }
    paywall_core::request_context::RequestContext { headers: map, method: "POST".to_owned(), url: "/mcp".to_owned() }
}

async fn dispatch(state: AppState, body: Value) -> Response {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = body.get("params").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let result = match method {
        "initialize" => Ok(initialize_result(&state).await),
        "tools/list" => Ok(list_tools(&state).await),
        "tools/call" => call_registered(&state, HandlerKind::Tool, params).await,
        "resources/list" => Ok(list_resources(&state).await),
        "resources/read" => call_registered(&state, HandlerKind::Resource, params).await,
        "prompts/list" => Ok(list_prompts(&state).await),
        "prompts/get" => call_registered(&state, HandlerKind::Prompt, params).await,
        other => Err(paywall_core::rpc::RpcError::invalid_params(format!("unknown method {other}"))),
    };

    match result {
        Ok(value) => Json(json!({"jsonrpc": "2.0", "id": id, "result": value})).into_response(),
        Err(rpc_error) => Json(json!({"jsonrpc": "2.0", "id": id, "error": rpc_error})).into_response(),
    }
}

async fn initialize_result(state: &AppState) -> Value {
    let session_id = state.manager.sessions.create("2024-11-05");
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
        "sessionId": session_id,
    })
}

async fn list_tools(state: &AppState) -> Value {
    let registry = state.manager.registry.lock().await;
    let tools: Vec<Value> = registry
        .tools
        .values()
        .map(|t| json!({"name": t.name, "inputSchema": t.input_schema.clone().unwrap_or_else(|| json!({"type": "object"}))}))
        .collect();
    json!({"tools": tools})
}

async fn list_resources(state: &AppState) -> Value {
    let registry = state.manager.registry.lock().await;
    let resources: Vec<Value> = registry.resources.values().map(|r| json!({"uri": r.uri, "isTemplate": r.is_template})).collect();
    json!({"resources": resources})
}

async fn list_prompts(state: &AppState) -> Value {
    let registry = state.manager.registry.lock().await;
    let prompts: Vec<Value> = registry.prompts.values().map(|p| json!({"name": p.name})).collect();
    json!({"prompts": prompts})
}

async fn call_registered(state: &AppState, kind: HandlerKind, params: Value) -> Result<Value, paywall_core::rpc::RpcError> {
    use paywall_core::rpc::ToRpcError;

    let name = match kind {
        HandlerKind::Tool => params.get("name").and_then(Value::as_str),
        HandlerKind::Resource => params.get("uri").and_then(Value::as_str),
        HandlerKind::Prompt => params.get("name").and_then(Value::as_str),
    }
    .ok_or_else(|| paywall_core::rpc::RpcError::invalid_params("missing name"))?
    .to_owned();

    let args = params.get("arguments").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let extra = json!({"headers": extra_headers_from_context()});

    let (options, handler) = {
        let registry = state.manager.registry.lock().await;
        match kind {
            HandlerKind::Tool => registry.tools.get(&name).map(|t| (t.options.clone(), Arc::clone(&t.handler))),
            HandlerKind::Resource => resolve_resource(&registry, &name),
            HandlerKind::Prompt => registry.prompts.get(&name).map(|p| (p.options.clone(), Arc::clone(&p.handler))),
        }
        .ok_or_else(|| paywall_core::rpc::RpcError::invalid_params(format!("unknown {}: {name}", kind.url_segment())))?
    };

    let outcome = state
        .manager
        .engine
        .call(&options, args, extra, move |args, extra, ctx| handler(args, extra, ctx))
        .await
        .map_err(|e: PaywallError| e.to_rpc_error())?;

    match outcome {
        CallOutcome::Value(value) => Ok(value),
        CallOutcome::Stream(mut stream) => {
            use futures_util::StreamExt;
            let mut chunks = Vec::new();
            while let Some(chunk) = stream.next().await {
                chunks.push(chunk);
            }
            Ok(json!({"chunks": chunks}))
        }
    }
}

fn resolve_resource(registry: &Registry, uri: &str) -> Option<(paywall_core::engine::PaywallOptions, Handler)> {
    if let Some(exact) = registry.resources.get(uri) {
        return Some((exact.options.clone(), Arc::clone(&exact.handler)));
    }
    registry
        .resources
        .values()
        .find(|r| r.is_template && template_matches(&r.uri, uri))
        .map(|r| (r.options.clone(), Arc::clone(&r.handler)))
}

fn template_matches(template: &str, candidate: &str) -> bool {
    let prefix = template.split('{').next().unwrap_or(template);
    candidate.starts_with(prefix)
}

fn extra_headers_from_context() -> Value {
    paywall_core::request_context::current()
        .map(|ctx| {
            let map: serde_json::Map<String, Value> = ctx.headers.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            Value::Object(map)
        })
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use paywall_core::engine::{HandlerOutput, PaywallOptions};
    use paywall_core::facilitator::FacilitatorClient;
    use paywall_core::types::{HandlerKind, OnRedeemError};

    use super::*;

    fn manager() -> Arc<McpServerManager> {
        let facilitator = FacilitatorClient::new("http://localhost:4021".parse().unwrap());
        let engine = PaywallEngine::new(facilitator, "agent-1".to_owned(), "demo-server".to_owned());
        Arc::new(McpServerManager::new(engine))
    }

    fn config(port: u16) -> McpServerConfig {
        McpServerConfig {
            agent_id: "agent-1".to_owned(),
            server_name: "demo-server".to_owned(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            facilitator_base_url: "http://localhost:4021".to_owned(),
        }
    }

    fn options(name: &str) -> PaywallOptions {
        PaywallOptions {
            kind: HandlerKind::Tool,
            name: name.to_owned(),
            credits: paywall_core::credits::CreditsOption::Fixed(1),
            plan_id: None,
            max_amount: None,
            on_redeem_error: OnRedeemError::Ignore,
        }
    }

    fn echo_handler() -> Handler {
        Arc::new(|args, _extra, _ctx| Box::pin(async move { Ok(HandlerOutput::Value(args)) }))
    }

    #[tokio::test]
    async fn starts_idle() {
        assert_eq!(manager().state().await, ServerState::Idle);
    }

    #[tokio::test]
    async fn registration_is_legal_while_idle() {
        let manager = manager();
        assert!(manager.register_tool("echo", None, options("echo"), echo_handler()).await.is_ok());
        assert!(manager.register_resource("file:///{path}", options("file"), echo_handler()).await.is_ok());
        assert!(manager.register_prompt("greet", options("greet"), echo_handler()).await.is_ok());
    }

    #[tokio::test]
    async fn start_rejects_missing_agent_id() {
        let manager = manager();
        let mut cfg = config(0);
        cfg.agent_id = String::new();
        let err = manager.start(&cfg).await.unwrap_err();
        assert!(matches!(err, McpError::MissingAgentId));
        assert_eq!(manager.state().await, ServerState::Idle);
    }

    #[tokio::test]
    async fn start_then_stop_returns_to_idle_and_rejects_double_stop() {
        let manager = manager();
        manager.register_tool("echo", None, options("echo"), echo_handler()).await.unwrap();

        let addr = manager.start(&config(0)).await.unwrap();
        assert!(addr.port() > 0);
        assert_eq!(manager.state().await, ServerState::Running);

        assert!(manager.register_tool("late", None, options("late"), echo_handler()).await.is_err());

        manager.stop().await.unwrap();
        assert_eq!(manager.state().await, ServerState::Idle);

        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, McpError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let manager = manager();
        manager.start(&config(0)).await.unwrap();
        let err = manager.start(&config(0)).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidTransition { .. }));
        manager.stop().await.unwrap();
    }
}
