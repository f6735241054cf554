//! Completion service boundary.
//!
//! The [`Backend`] trait is the only thing the rest of the crate knows about
//! the remote completion service: it takes a fully rendered
//! [`RequestConfig`] and returns a [`CompletionResponse`] or a service
//! error. Built-in implementations: [`HttpBackend`] (posts the request as
//! JSON to any chat-completions style endpoint) and [`MockBackend`].
//!
//! ```text
//! PromptFunction ──► RequestConfig ──► Backend::complete() ──► CompletionResponse
//!                                              │
//!                                   ┌──────────┴──────────┐
//!                              HttpBackend            MockBackend
//! ```

pub mod backoff;
pub mod http;
pub mod mock;

pub use backoff::BackoffConfig;
pub use http::HttpBackend;
pub use mock::MockBackend;

use crate::error::Result;
use crate::request::RequestConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// A provider response, kept as the provider's own JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
    /// The decoded response body.
    pub body: Value,
}

impl CompletionResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Text of the first choice, for chat-completions shaped bodies
    /// (`choices[0].message.content`).
    pub fn content(&self) -> Option<&str> {
        self.body
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
    }
}

/// Abstraction over completion providers.
///
/// Implementations fail with a service error ([`PromptError::Service`],
/// [`PromptError::Request`] or [`PromptError::HttpError`]); callers do not
/// distinguish retryable from permanent causes.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
///
/// [`PromptError::Service`]: crate::PromptError::Service
/// [`PromptError::Request`]: crate::PromptError::Request
/// [`PromptError::HttpError`]: crate::PromptError::HttpError
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one completion request.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &RequestConfig,
    ) -> Result<CompletionResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
