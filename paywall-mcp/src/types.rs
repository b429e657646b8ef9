//! Registration and lifecycle types for the MCP server manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use paywall_core::engine::{HandlerOutput, PaywallOptions};
use paywall_core::types::PaywallContext;
use serde_json::Value;

/// The future returned by a registered tool/resource/prompt handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutput, String>> + Send>>;

/// A handler wrapped by [`crate::server::McpServerManager::register_tool`] and
/// friends, stored behind an `Arc` so the server manager can invoke it from
/// any request task.
pub type Handler = Arc<dyn Fn(Value, Value, PaywallContext) -> HandlerFuture + Send + Sync>;

/// A tool registered while the server manager was `Idle`.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Tool name, as advertised to MCP clients.
    pub name: String,
    /// JSON schema describing the tool's input, if any.
    pub input_schema: Option<Value>,
    /// Paywall options this tool is billed under.
    pub options: PaywallOptions,
    /// The wrapped handler.
    pub handler: Handler,
}

/// A resource (or resource template) registered while `Idle`.
#[derive(Clone)]
pub struct RegisteredResource {
    /// The resource URI, or a URI template when [`Self::is_template`] is set.
    pub uri: String,
    /// `true` when `uri` contains a `{…}` placeholder.
    pub is_template: bool,
    /// Paywall options this resource is billed under.
    pub options: PaywallOptions,
    /// The wrapped handler.
    pub handler: Handler,
}

/// A prompt registered while `Idle`.
#[derive(Clone)]
pub struct RegisteredPrompt {
    /// Prompt name, as advertised to MCP clients.
    pub name: String,
    /// Paywall options this prompt is billed under.
    pub options: PaywallOptions,
    /// The wrapped handler.
    pub handler: Handler,
}

/// Returns `true` when `uri` should be registered as a template (contains a
/// `{...}` placeholder segment).
#[must_use]
pub fn is_uri_template(uri: &str) -> bool {
    uri.contains('{') && uri.contains('}')
}

/// Lifecycle state of an [`crate::server::McpServerManager`].
///
/// Registration (`register_tool`/`register_resource`/`register_prompt`) is
/// legal only in [`Self::Idle`]; `start`/`stop` are non-reentrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No listener bound; registration is legal.
    Idle,
    /// `start` is in progress.
    Starting,
    /// Listener bound and serving requests.
    Running,
    /// `stop` is in progress.
    Stopping,
}

impl ServerState {
    /// A short label for this state, used in error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_uri_templates() {
        assert!(is_uri_template("file:///{path}"));
        assert!(!is_uri_template("file:///readme.md"));
    }
}
