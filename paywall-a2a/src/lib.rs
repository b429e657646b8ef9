#![cfg_attr(docsrs, feature(doc_cfg))]

//! A2A client registry and streaming JSON-RPC client for agents billed
//! through the credit-based paywall engine.
//!
//! [`ClientRegistry`] hands out one cached [`client::PaymentsClient`] per
//! `(agentBaseUrl, agentId, planId)` tuple; the client itself speaks
//! JSON-RPC 2.0 over `reqwest`, with bearer-token auth and a hand-rolled
//! SSE decoder for the two streaming methods.
//!
//! # Feature flags
//!
//! - `telemetry` — enables tracing instrumentation.

pub mod client;
pub mod error;
pub mod registry;
mod sse;

pub use client::{PaymentsClient, ResultStream};
pub use error::A2aError;
pub use registry::{ClientRegistry, GetClientRequest};
