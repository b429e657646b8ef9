//! Request-scoped context propagation.
//!
//! Every code path executing inside [`run`] — including across `.await`
//! suspension points — observes the same [`RequestContext`] via
//! [`current`]. Outside a `run`, the accessor returns `None`. This crate
//! targets a task-based async runtime, so the association is a task-local
//! slot rather than a thread-local: there is no parent/child inheritance
//! across spawned tasks.

use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static CONTEXT: RequestContext;
}

/// Headers, method, and URL captured at the HTTP entry point for the
/// duration of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Inbound headers, lower-cased keys.
    pub headers: HashMap<String, String>,
    /// HTTP method of the inbound request.
    pub method: String,
    /// Full URL of the inbound request.
    pub url: String,
}

/// Runs `fut` with `ctx` installed as the current request context.
pub async fn run<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    CONTEXT.scope(ctx, fut).await
}

/// Returns a clone of the current request context, if any code higher on
/// the task's call stack installed one via [`run`].
pub fn current() -> Option<RequestContext> {
    CONTEXT.try_with(Clone::clone).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_none_outside_run() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn current_sees_installed_context_across_await() {
        let ctx = RequestContext {
            headers: HashMap::from([("authorization".to_owned(), "Bearer tok".to_owned())]),
            method: "POST".to_owned(),
            url: "http://localhost/mcp".to_owned(),
        };
        run(ctx, async {
            tokio::task::yield_now().await;
            let observed = current().expect("context installed");
            assert_eq!(observed.method, "POST");
            assert_eq!(observed.headers.get("authorization").unwrap(), "Bearer tok");
        })
        .await;
        assert!(current().is_none());
    }
}
