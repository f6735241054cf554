//! The request configuration sent to a completion service and its
//! content-addressed identity.

use crate::error::{PromptError, Result};
use crate::messages::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Keys of the declared fields. `extra` may not reuse them.
pub const DECLARED_FIELDS: &[&str] = &[
    "model",
    "temperature",
    "messages",
    "max_tokens",
    "top_p",
    "frequency_penalty",
    "presence_penalty",
    "n",
    "stop",
    "seed",
    "user",
    "logit_bias",
    "functions",
    "function_call",
    "tools",
    "tool_choice",
    "response_format",
];

fn default_temperature() -> f64 {
    0.7
}

/// Stop sequence(s): providers accept either a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

/// Model, sampling parameters and messages for one completion request.
///
/// A `RequestConfig` is a value: two configs with the same field values have
/// the same [`unique_hash`](Self::unique_hash) no matter how they were built.
/// Optional fields left as `None` are omitted from the serialized form.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::RequestConfig;
///
/// let a = RequestConfig::new("gpt-4o").with_temperature(0.2).with_seed(7);
/// let b = RequestConfig::new("gpt-4o").with_seed(7).with_temperature(0.2);
/// assert_eq!(a.unique_hash().unwrap(), b.unique_hash().unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Model identifier (e.g. `"gpt-4o"`).
    pub model: String,

    /// Sampling temperature. Default: 0.7.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Messages in conversation order. For a prompt definition these hold the
    /// template text; for a rendered request, the final text.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Number of completions to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// End-user identifier forwarded to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f64>>,

    /// Legacy function-calling schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,

    /// Provider-specific fields passed through untouched. Keys must not
    /// collide with [`DECLARED_FIELDS`].
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RequestConfig {
    /// A config for `model` with default sampling and no messages.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            messages: Vec::new(),
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            n: None,
            stop: None,
            seed: None,
            user: None,
            logit_bias: None,
            functions: None,
            function_call: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: Stop) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, choice: Value) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_response_format(mut self, format: Value) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Force a structured answer through legacy function calling.
    ///
    /// Sets `functions` to `[schema]` and `function_call` to
    /// `{"name": <schema.name>}`.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        if let Some(name) = schema.get("name").cloned() {
            self.function_call = Some(json!({ "name": name }));
        }
        self.functions = Some(vec![schema]);
        self
    }

    /// Set a provider-specific field. A key naming a declared field is
    /// ignored; set that field through its own builder instead.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if DECLARED_FIELDS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "ignoring extra field that shadows a declared field");
            return self;
        }
        self.extra.insert(key, value);
        self
    }

    /// Replace the message list.
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Fails with [`PromptError::InvalidConfig`] when an `extra` key would
    /// overwrite a declared field in the serialized form.
    pub fn check_extra(&self) -> Result<()> {
        let shadowed: Vec<&str> = self
            .extra
            .keys()
            .map(String::as_str)
            .filter(|k| DECLARED_FIELDS.contains(k))
            .collect();
        if shadowed.is_empty() {
            return Ok(());
        }
        Err(PromptError::InvalidConfig(format!(
            "extra fields shadow declared fields: {}",
            shadowed.join(", ")
        )))
    }

    /// The JSON body for the provider: every set field, messages included.
    pub fn to_request_body(&self) -> Result<Value> {
        self.check_extra()?;
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to canonical JSON: object keys sorted at every depth, no
    /// insignificant whitespace.
    pub fn canonical_json(&self) -> Result<String> {
        let value = self.to_request_body()?;
        let mut out = String::new();
        write_canonical(&value, &mut out)?;
        Ok(out)
    }

    /// SHA-256 of [`canonical_json`](Self::canonical_json), hex encoded
    /// (64 characters).
    pub fn unique_hash(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}
