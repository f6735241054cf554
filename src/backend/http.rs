//! Backend that posts the rendered request as JSON over HTTP.
//!
//! [`HttpBackend`] sends [`RequestConfig::to_request_body`] unchanged to
//! `{base_url}{path}` and returns the decoded JSON body. It makes no
//! assumption about the provider beyond "JSON in, JSON out", so it works
//! with OpenAI-compatible servers and with LLM gateways that accept the same
//! request shape.

use super::{Backend, CompletionResponse};
use crate::error::Result;
use crate::request::RequestConfig;
use crate::PromptError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Default request path appended to the base URL.
pub const DEFAULT_PATH: &str = "/v1/chat/completions";

/// JSON-over-HTTP completion backend.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::backend::HttpBackend;
///
/// let backend = HttpBackend::new().with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone)]
pub struct HttpBackend {
    /// Optional credential, sent as `Authorization: Bearer {key}`.
    pub(crate) api_key: Option<String>,
    /// Request path appended to the base URL.
    pub(crate) path: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.chars().count() > 6 {
                        format!("{}***", k.chars().take(6).collect::<String>())
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .field("path", &self.path)
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend without authentication that posts to [`DEFAULT_PATH`].
    pub fn new() -> Self {
        Self {
            api_key: None,
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Set the credential passed through to the provider.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the request path (e.g. `"/chat/completions"`).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Returns `true` if an API key has been configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if self.path.is_empty() {
            return base.to_string();
        }
        format!("{}/{}", base, self.path.trim_start_matches('/'))
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &RequestConfig,
    ) -> Result<CompletionResponse> {
        let url = self.url(base_url);
        let body = request.to_request_body()?;

        let mut req = client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(PromptError::HttpError {
                status,
                body,
                retry_after,
            });
        }

        let body: Value = resp.json().await?;
        Ok(CompletionResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> RequestConfig {
        RequestConfig::new("test-model").with_messages(vec![ChatMessage::user("hello")])
    }

    #[test]
    fn test_url_joining() {
        let backend = HttpBackend::new();
        assert_eq!(
            backend.url("http://localhost:8080/"),
            "http://localhost:8080/v1/chat/completions"
        );
        let bare = HttpBackend::new().with_path("");
        assert_eq!(bare.url("http://gw/complete"), "http://gw/complete");
    }

    #[test]
    fn test_debug_redacts_key() {
        let backend = HttpBackend::new().with_api_key("sk-1234567890");
        let dbg = format!("{:?}", backend);
        assert!(dbg.contains("sk-123***"));
        assert!(!dbg.contains("567890"));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(HttpBackend::parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(HttpBackend::parse_retry_after("soon"), None);
    }

    #[tokio::test]
    async fn test_complete_posts_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new().with_api_key("secret");
        let resp = backend
            .complete(&Client::new(), &server.uri(), &request())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content(), Some("hi there"));
    }

    #[tokio::test]
    async fn test_complete_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let err = HttpBackend::new()
            .complete(&Client::new(), &server.uri(), &request())
            .await
            .unwrap_err();
        match err {
            PromptError::HttpError {
                status,
                body,
                retry_after,
            } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected HttpError, got {:?}", other),
        }
    }
}
