//! Prompt functions: a reusable prompt definition bound to a request config.
//!
//! A [`PromptFunction`] owns one [`RequestConfig`] (model and sampling
//! fields) plus a prompt slot and a system-message slot, each either literal
//! text or a parsed [`Template`]. Calling it with an argument map renders a
//! fresh request; the definition itself never changes.

use crate::backend::CompletionResponse;
use crate::batch::{self, BatchOptions};
use crate::error::{ArgumentViolation, PromptError, Result, Slot};
use crate::exec_ctx::ExecCtx;
use crate::hub::RegistryClient;
use crate::messages::{compile, ChatMessage, MessageSpec, Role};
use crate::request::RequestConfig;
use crate::store::{Persister, SaveOutcome};
use crate::template::{Args, Template};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;

/// A callable, parameterized prompt.
///
/// # Example
///
/// ```no_run
/// use llm_prompt_batch::{ExecCtx, PromptFunction, RequestConfig};
/// use llm_prompt_batch::template::Args;
/// use serde_json::json;
///
/// # async fn run() -> llm_prompt_batch::Result<()> {
/// let translate = PromptFunction::new(RequestConfig::new("gpt-4o").with_temperature(0.0))
///     .with_system_message("You are a translator.")
///     .with_prompt_template("Translate to {{ lang }}: {{ text }}")?;
///
/// let ctx = ExecCtx::builder("https://api.openai.com").build();
/// let mut args = Args::new();
/// args.insert("lang".into(), json!("French"));
/// args.insert("text".into(), json!("Good morning"));
/// let response = translate.call(&ctx, &args).await?;
/// println!("{:?}", response.content());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PromptFunction {
    config: RequestConfig,
    prompt: Option<String>,
    prompt_template: Option<Template>,
    system_message: Option<String>,
    system_message_template: Option<Template>,
}

impl PromptFunction {
    /// Create a prompt function with empty slots. Messages already present
    /// in `config` are replaced by the slots; use [`from_config`](Self::from_config)
    /// to turn stored messages into slots.
    pub fn new(config: RequestConfig) -> Self {
        let mut function = Self {
            config,
            prompt: None,
            prompt_template: None,
            system_message: None,
            system_message_template: None,
        };
        function.sync_messages();
        function
    }

    /// Rebuild a prompt function from a stored config.
    ///
    /// A `system` message becomes the system-message template and a `user`
    /// message the prompt template. Any other role, or a repeated role,
    /// is rejected.
    pub fn from_config(config: RequestConfig) -> Result<Self> {
        let messages = config.messages.clone();
        let mut function = Self::new(config);
        for message in messages {
            match message.role {
                Role::System if function.system_message_template.is_none() => {
                    function = function.with_system_message_template(message.content)?;
                }
                Role::User if function.prompt_template.is_none() => {
                    function = function.with_prompt_template(message.content)?;
                }
                role => {
                    return Err(PromptError::InvalidConfig(format!(
                        "unsupported message layout: unexpected '{}' message",
                        role
                    )))
                }
            }
        }
        Ok(function)
    }

    /// Set a literal user prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self.sync_messages();
        self
    }

    /// Set the user prompt template. Fails on a template syntax error.
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Result<Self> {
        self.prompt_template = Some(Template::parse(template)?);
        self.sync_messages();
        Ok(self)
    }

    /// Set a literal system message.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self.sync_messages();
        self
    }

    /// Set the system-message template. Fails on a template syntax error.
    pub fn with_system_message_template(mut self, template: impl Into<String>) -> Result<Self> {
        self.system_message_template = Some(Template::parse(template)?);
        self.sync_messages();
        Ok(self)
    }

    /// The definition-level config: model, sampling fields, and the
    /// unrendered slot text as messages. This is what gets stored and hashed.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Every free variable across both template slots.
    pub fn variables(&self) -> BTreeSet<String> {
        [&self.prompt_template, &self.system_message_template]
            .into_iter()
            .flatten()
            .flat_map(|t| t.variables().iter().cloned())
            .collect()
    }

    fn sync_messages(&mut self) {
        let system = self
            .system_message_template
            .as_ref()
            .map(|t| t.source().to_string())
            .or_else(|| self.system_message.clone());
        let prompt = self
            .prompt_template
            .as_ref()
            .map(|t| t.source().to_string())
            .or_else(|| self.prompt.clone());

        let mut messages = Vec::with_capacity(2);
        if let Some(content) = system.filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(content));
        }
        if let Some(content) = prompt.filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::user(content));
        }
        self.config.messages = messages;
    }

    /// Check the slot combination once, independent of any arguments.
    ///
    /// Used before a batch starts so that a definition every element shares
    /// fails the batch as a whole instead of failing each element.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.as_deref().is_some_and(|s| !s.is_empty()) && self.prompt_template.is_some() {
            return Err(ArgumentViolation::MutuallyExclusive(Slot::Prompt).into());
        }
        if self.system_message.as_deref().is_some_and(|s| !s.is_empty())
            && self.system_message_template.is_some()
        {
            return Err(ArgumentViolation::MutuallyExclusive(Slot::SystemMessage).into());
        }
        if self.config.messages.is_empty() {
            return Err(PromptError::InvalidConfig(
                "prompt function has neither a prompt nor a system message".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the message list for one argument map.
    ///
    /// The map is split per slot: each template receives only the keys it
    /// references. A key no template references is rejected.
    pub fn compile_messages(&self, args: &Args) -> Result<Vec<ChatMessage>> {
        let known = self.variables();
        let unknown: Vec<String> = args
            .keys()
            .filter(|k| !known.contains(*k))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ArgumentViolation::UnknownArguments(unknown).into());
        }

        let prompt_args = slot_args(self.prompt_template.as_ref(), args);
        let system_args = slot_args(self.system_message_template.as_ref(), args);

        let mut spec = MessageSpec::new();
        spec.prompt = self.prompt.as_deref();
        spec.prompt_template = self.prompt_template.as_ref();
        spec.prompt_args = prompt_args.as_ref();
        spec.system_message = self.system_message.as_deref();
        spec.system_message_template = self.system_message_template.as_ref();
        spec.system_message_args = system_args.as_ref();
        compile(&spec)
    }

    /// Produce the concrete request for one argument map: same model and
    /// sampling fields, freshly rendered messages.
    pub fn render_request(&self, args: &Args) -> Result<RequestConfig> {
        let messages = self.compile_messages(args)?;
        if messages.is_empty() {
            return Err(PromptError::InvalidConfig(
                "a request requires at least one message".to_string(),
            ));
        }
        Ok(self.config.clone().with_messages(messages))
    }

    /// Render and send one request. Errors are returned as-is, never retried.
    pub async fn call(&self, ctx: &ExecCtx, args: &Args) -> Result<CompletionResponse> {
        let request = self.render_request(args)?;
        tracing::debug!(
            backend = ctx.backend.name(),
            model = %request.model,
            messages = request.messages.len(),
            "sending completion request"
        );
        ctx.backend.complete(&ctx.client, &ctx.base_url, &request).await
    }

    /// Blocking form of [`call`](Self::call).
    ///
    /// Runs on a private single-threaded runtime; must not be called from
    /// inside an async context.
    pub fn call_blocking(&self, ctx: &ExecCtx, args: &Args) -> Result<CompletionResponse> {
        block_on(self.call(ctx, args))?
    }

    /// Run one call per argument map under the batch policy in `options`.
    /// See [`batch::run_batch`].
    pub async fn run_batch(
        &self,
        ctx: &ExecCtx,
        batch_args: Vec<Args>,
        options: &BatchOptions,
    ) -> Result<Vec<Option<CompletionResponse>>> {
        batch::run_batch(self, ctx, batch_args, options).await
    }

    /// Blocking form of [`run_batch`](Self::run_batch).
    pub fn batch_call(
        &self,
        ctx: &ExecCtx,
        batch_args: Vec<Args>,
        options: &BatchOptions,
    ) -> Result<Vec<Option<CompletionResponse>>> {
        block_on(self.run_batch(ctx, batch_args, options))?
    }

    /// Save the definition config to a store.
    pub fn push_to_dir(&self, store: &dyn Persister) -> Result<SaveOutcome> {
        store.save(&self.config)
    }

    /// Load the default (or most recent) definition from a store.
    pub fn from_dir(store: &dyn Persister) -> Result<Self> {
        Self::from_config(store.load()?)
    }

    /// Publish the definition config to a registry under `name`.
    pub async fn push_to_hub(&self, hub: &dyn RegistryClient, name: &str) -> Result<Value> {
        hub.push(name, &self.config).await
    }

    /// Fetch a definition from a registry by name.
    pub async fn from_hub(hub: &dyn RegistryClient, name: &str) -> Result<Self> {
        Self::from_config(hub.pull(name).await?.config)
    }
}

/// The subset of `args` a template reads, or `None` when it reads nothing.
fn slot_args(template: Option<&Template>, args: &Args) -> Option<Args> {
    let template = template.filter(|t| t.has_variables())?;
    Some(
        args.iter()
            .filter(|(k, _)| template.variables().contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
