//! Client for a remote prompt registry ("hub").
//!
//! ```text
//! POST {base_url}/prompt-functions/        {name, hash_id, <config fields>}
//! GET  {base_url}/prompt-functions/{name}  same shape
//! ```

use crate::error::{PromptError, Result};
use crate::request::RequestConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environment variable read by [`HubConfig::from_env`].
pub const HUB_URL_ENV: &str = "HUB_API_URL";

/// Registry connection settings.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Registry base URL, e.g. `https://hub.example.com/api`.
    pub base_url: Option<String>,
}

impl HubConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
        }
    }

    /// Read the base URL from `HUB_API_URL`. An unset variable leaves
    /// `base_url` empty; the error surfaces when a client is built.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(HUB_URL_ENV).ok(),
        }
    }
}

/// A registry entry: a name, the config hash, and the config itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRecord {
    pub name: String,
    pub hash_id: String,
    #[serde(flatten)]
    pub config: RequestConfig,
}

impl HubRecord {
    pub fn new(name: impl Into<String>, config: RequestConfig) -> Result<Self> {
        if let Some(key) = ["name", "hash_id"].into_iter().find(|k| config.extra.contains_key(*k)) {
            return Err(PromptError::InvalidConfig(format!(
                "extra field '{}' collides with a hub record field",
                key
            )));
        }
        Ok(Self {
            name: name.into(),
            hash_id: config.unique_hash()?,
            config,
        })
    }
}

/// A remote registry that can store and return configs by name.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Publish `config` under `name`; returns the registry's stored record.
    async fn push(&self, name: &str, config: &RequestConfig) -> Result<Value>;

    /// Fetch the record stored under `name`.
    async fn pull(&self, name: &str) -> Result<HubRecord>;
}

/// HTTP [`RegistryClient`].
///
/// # Example
///
/// ```
/// use llm_prompt_batch::hub::{HubClient, HubConfig};
/// use llm_prompt_batch::PromptError;
///
/// let missing = HubClient::new(reqwest::Client::new(), &HubConfig::default());
/// assert!(matches!(missing, Err(PromptError::MissingConfiguration(_))));
///
/// let hub = HubClient::new(reqwest::Client::new(), &HubConfig::new("http://localhost:8000")).unwrap();
/// assert_eq!(hub.base_url(), "http://localhost:8000");
/// ```
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    base_url: String,
}

impl HubClient {
    /// Fails with [`PromptError::MissingConfiguration`] when no base URL is
    /// set, and with [`PromptError::InvalidConfig`] when it is not a URL that
    /// can take path segments.
    pub fn new(client: Client, config: &HubConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                PromptError::MissingConfiguration(format!(
                    "hub base URL is not set (configure it or export {})",
                    HUB_URL_ENV
                ))
            })?;
        let hub = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        hub.endpoint("")?;
        Ok(hub)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/prompt-functions/{name}` with `name` percent-encoded as a
    /// single path segment. An empty name gives the collection URL.
    fn endpoint(&self, name: &str) -> Result<Url> {
        let invalid = || PromptError::InvalidConfig(format!("invalid hub base URL: {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("prompt-functions")
            .push(name);
        Ok(url)
    }
}

#[async_trait]
impl RegistryClient for HubClient {
    async fn push(&self, name: &str, config: &RequestConfig) -> Result<Value> {
        let record = HubRecord::new(name, config.clone())?;
        tracing::debug!(name, hash_id = %record.hash_id, "pushing to hub");

        let resp = self
            .client
            .post(self.endpoint("")?)
            .json(&record)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(PromptError::HttpError {
                status: status.as_u16(),
                body,
                retry_after: None,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn pull(&self, name: &str) -> Result<HubRecord> {
        let resp = self
            .client
            .get(self.endpoint(name)?)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PromptError::HttpError {
                status,
                body,
                retry_after: None,
            });
        }

        let record: HubRecord = resp.json().await?;
        let computed = record.config.unique_hash()?;
        if record.hash_id != computed {
            tracing::warn!(
                name,
                stored = %record.hash_id,
                computed = %computed,
                "hub record hash does not match its config"
            );
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PromptFunction;
    use crate::messages::ChatMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> RequestConfig {
        RequestConfig::new("gpt-4o")
            .with_max_tokens(64)
            .with_messages(vec![ChatMessage::user("Summarize {{ text }}")])
    }

    fn hub(server: &MockServer) -> HubClient {
        HubClient::new(Client::new(), &HubConfig::new(server.uri())).unwrap()
    }

    #[test]
    fn test_missing_and_blank_base_url() {
        for config in [HubConfig::default(), HubConfig::new("   ")] {
            assert!(matches!(
                HubClient::new(Client::new(), &config),
                Err(PromptError::MissingConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = HubRecord::new("summarize", config()).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "summarize");
        assert_eq!(value["hash_id"], config().unique_hash().unwrap());
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_tokens"], 64);

        let back: HubRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
        assert!(back.config.extra.is_empty());
    }

    #[tokio::test]
    async fn test_push_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt-functions/"))
            .and(body_partial_json(json!({
                "name": "summarize",
                "hash_id": config().unique_hash().unwrap(),
                "model": "gpt-4o",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .mount(&server)
            .await;

        let stored = hub(&server).push("summarize", &config()).await.unwrap();
        assert_eq!(stored["id"], 7);
    }

    #[tokio::test]
    async fn test_push_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .mount(&server)
            .await;

        let err = hub(&server).push("summarize", &config()).await.unwrap_err();
        assert!(matches!(err, PromptError::HttpError { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_pull_returns_record() {
        let server = MockServer::start().await;
        let record = HubRecord::new("summarize", config()).unwrap();
        Mock::given(method("GET"))
            .and(path("/prompt-functions/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;

        let pulled = hub(&server).pull("summarize").await.unwrap();
        assert_eq!(pulled, record);
    }

    #[tokio::test]
    async fn test_pull_non_200_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such prompt"))
            .mount(&server)
            .await;

        let err = hub(&server).pull("missing").await.unwrap_err();
        assert!(matches!(err, PromptError::HttpError { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_prompt_function_hub_round_trip() {
        let server = MockServer::start().await;
        let function = PromptFunction::new(RequestConfig::new("gpt-4o"))
            .with_system_message("Be concise.")
            .with_prompt_template("Summarize {{ text }}")
            .unwrap();
        let record = HubRecord::new("summarize", function.config().clone()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prompt-functions/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;

        let client = hub(&server);
        function.push_to_hub(&client, "summarize").await.unwrap();
        let pulled = PromptFunction::from_hub(&client, "summarize").await.unwrap();
        assert_eq!(pulled.config().unique_hash().unwrap(), function.config().unique_hash().unwrap());
    }

    #[tokio::test]
    async fn test_pull_encodes_name_as_one_segment() {
        let server = MockServer::start().await;
        let record = HubRecord::new("team/summarize?v=2#x", config()).unwrap();
        Mock::given(method("GET"))
            .and(path("/prompt-functions/team%2Fsummarize%3Fv=2%23x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;

        let pulled = hub(&server).pull("team/summarize?v=2#x").await.unwrap();
        assert_eq!(pulled.name, "team/summarize?v=2#x");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let hub = HubClient::new(Client::new(), &HubConfig::new("http://hub.local/api/")).unwrap();
        assert_eq!(
            hub.endpoint("").unwrap().as_str(),
            "http://hub.local/api/prompt-functions/"
        );
        assert_eq!(
            hub.endpoint("a b").unwrap().as_str(),
            "http://hub.local/api/prompt-functions/a%20b"
        );
    }

    #[test]
    fn test_unparseable_base_url() {
        assert!(matches!(
            HubClient::new(Client::new(), &HubConfig::new("not a url")),
            Err(PromptError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_record_rejects_colliding_extra() {
        let config = config().with_extra("hash_id", json!("forged"));
        assert!(matches!(
            HubRecord::new("summarize", config),
            Err(PromptError::InvalidConfig(_))
        ));
    }
}
