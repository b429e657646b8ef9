#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core of the credit-based paywall engine.
//!
//! This crate decodes access tokens, talks to the facilitator backend that
//! verifies and settles entitlement, resolves auth and credit cost, and
//! orchestrates the verify → handler → settle lifecycle around a protected
//! call. It is transport-agnostic; [`paywall-mcp`](../paywall_mcp/index.html)
//! and [`paywall-http`](../paywall_http/index.html) bind it to MCP and
//! x402-HTTP respectively.
//!
//! # Modules
//!
//! - [`token`] - access token codec
//! - [`facilitator`] - facilitator HTTP client and plan-metadata cache
//! - [`logical_url`] - deterministic capability URI builder
//! - [`auth`] - bearer extraction and verify-with-fallback
//! - [`credits`] - credit cost resolution
//! - [`engine`] - the paywall decorator itself
//! - [`request_context`] - request-scoped context propagation
//! - [`agent_card`] - agent card builder/validator
//! - [`rpc`] - shared JSON-RPC error shape
//!
//! # Feature Flags
//!
//! - `telemetry` - enables tracing instrumentation

pub mod agent_card;
pub mod auth;
pub mod credits;
pub mod engine;
pub mod facilitator;
pub mod logical_url;
pub mod request_context;
pub mod rpc;
pub mod token;
pub mod types;

pub use rpc::RpcError;
