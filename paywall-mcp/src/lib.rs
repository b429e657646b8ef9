#![cfg_attr(docsrs, feature(doc_cfg))]

//! MCP (Model Context Protocol) server binding for the credit-based
//! paywall engine.
//!
//! Wraps registered tools, resources, and prompts with
//! [`paywall_core::engine::PaywallEngine`], serves them over a
//! session-managed JSON-RPC-over-HTTP endpoint, and exposes the OAuth
//! discovery metadata MCP clients expect alongside it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use paywall_core::engine::{PaywallEngine, PaywallOptions};
//! use paywall_core::facilitator::FacilitatorClient;
//! use paywall_core::types::HandlerKind;
//! use paywall_mcp::config::McpServerConfig;
//! use paywall_mcp::server::McpServerManager;
//!
//! let config = McpServerConfig::load()?;
//! let facilitator = FacilitatorClient::new(config.facilitator_base_url.parse()?);
//! let engine = PaywallEngine::new(facilitator, config.agent_id.clone(), config.server_name.clone());
//! let manager = Arc::new(McpServerManager::new(engine));
//!
//! manager
//!     .register_tool(
//!         "echo",
//!         None,
//!         PaywallOptions { kind: HandlerKind::Tool, name: "echo".into(), ..Default::default() },
//!         Arc::new(|args, _extra, _ctx| {
//!             Box::pin(async move { Ok(paywall_core::engine::HandlerOutput::Value(args)) })
//!         }),
//!     )
//!     .await?;
//!
//! manager.start(&config).await?;
//! ```
//!
//! # Feature flags
//!
//! - `rmcp` — reserved for integration with the official [`rmcp`](https://docs.rs/rmcp)
//!   Rust MCP SDK types; the JSON-RPC dispatch in [`server`] is hand-rolled
//!   and does not require it.
//! - `telemetry` — enables tracing instrumentation.

pub mod config;
pub mod error;
pub mod oauth;
pub mod server;
pub mod session;
pub mod types;
