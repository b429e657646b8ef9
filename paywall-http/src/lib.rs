#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! The x402-HTTP transport binding for the credit-based paywall engine: a
//! single [`tower::Layer`] that enforces payment across a whole route
//! table, rather than one hand-wired layer per protected route.
//!
//! # Feature flags
//!
//! - `telemetry` — enables tracing instrumentation.
//! - `full` — enables every optional feature.

pub mod error;
pub mod middleware;
pub mod route_table;

pub use middleware::{X402Layer, X402MiddlewareService};
pub use route_table::{RouteConfig, RouteTable};
