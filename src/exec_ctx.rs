//! Execution context shared across calls.
//!
//! [`ExecCtx`] carries the HTTP client, completion backend, endpoint and
//! optional event handler. Construct it once and share it across every
//! call and batch of an application.

use crate::backend::{Backend, HttpBackend};
use crate::events::EventHandler;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Shared execution context for prompt calls.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::ExecCtx;
/// use llm_prompt_batch::backend::HttpBackend;
/// use std::sync::Arc;
///
/// let ctx = ExecCtx::builder("https://api.openai.com")
///     .backend(Arc::new(HttpBackend::new().with_api_key("sk-...")))
///     .build();
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally).
    pub client: Client,
    /// Base URL of the completion provider.
    pub base_url: String,
    /// Completion backend. Default: [`HttpBackend`].
    pub backend: Arc<dyn Backend>,
    /// Optional event handler for batch progress and retries.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            event_handler: None,
            timeout: None,
        }
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the completion backend. Default: [`HttpBackend`] without a key.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the per-request HTTP timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`. This is a
    /// transport timeout for one call; the whole-batch deadline is
    /// [`BatchOptions::timeout`](crate::batch::BatchOptions::timeout).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        let client = self.client.unwrap_or_else(|| {
            Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default()
        });
        ExecCtx {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            backend: self.backend.unwrap_or_else(|| Arc::new(HttpBackend::new())),
            event_handler: self.event_handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_default_backend_is_http() {
        let ctx = ExecCtx::builder("http://localhost:8080").build();
        assert_eq!(ctx.backend.name(), "http");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let ctx = ExecCtx::builder("http://localhost:8080/").build();
        assert_eq!(ctx.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_custom_backend_and_timeout() {
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("ok")))
            .timeout(Duration::from_secs(120))
            .build();
        assert_eq!(ctx.backend.name(), "mock");
        assert!(format!("{:?}", ctx).contains("mock"));
    }
}
