//! Mock backend for testing without a live provider.
//!
//! [`MockBackend`] returns pre-configured responses in order, can fail a
//! fixed number of leading calls, and records every request it receives.
//!
//! # Example
//!
//! ```
//! use llm_prompt_batch::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["Hello, world!".to_string()]).with_failures(2);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{Backend, CompletionResponse};
use crate::error::Result;
use crate::request::RequestConfig;
use crate::PromptError;

/// A test backend that returns canned chat-completion bodies in order.
///
/// Cycles back to the beginning when all responses have been consumed.
#[derive(Debug)]
pub struct MockBackend {
    responses: Vec<String>,
    index: AtomicUsize,
    calls: AtomicUsize,
    failures: usize,
    latency: Option<Duration>,
    requests: Mutex<Vec<RequestConfig>>,
}

impl MockBackend {
    /// Create a mock backend with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the beginning.
    pub fn new(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "MockBackend requires at least one response");
        Self {
            responses,
            index: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            failures: 0,
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Fail the first `n` calls with a service error.
    pub fn with_failures(mut self, n: usize) -> Self {
        self.failures = n;
        self
    }

    /// Sleep before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total number of calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RequestConfig> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_response(&self) -> String {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        self.responses[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &RequestConfig,
    ) -> Result<CompletionResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if call < self.failures {
            return Err(PromptError::Service(format!("mock failure {}", call + 1)));
        }

        let text = self.next_response();
        Ok(CompletionResponse::new(
            200,
            json!({
                "model": request.model,
                "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}],
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
