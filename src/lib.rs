//! # LLM Prompt Batch
//!
//! Reusable prompt functions for chat-completion services, with bounded
//! concurrent batch execution.
//!
//! A [`PromptFunction`] pairs a request configuration (model, sampling
//! parameters, tool settings) with a user prompt and an optional system
//! message. Either slot can be a literal string or a Jinja template. Calling
//! the function renders both slots with the caller's arguments, builds the
//! message list and sends it to the configured [`Backend`].
//!
//! ## Core Concepts
//!
//! - **[`PromptFunction`]**: the reusable definition. Call it once with
//!   [`call`](PromptFunction::call) or over many argument maps with
//!   [`run_batch`](PromptFunction::run_batch).
//! - **[`ExecCtx`]**: shared execution context (HTTP client, endpoint,
//!   backend, optional event handler).
//! - **[`BatchOptions`]**: concurrency limit, retry count, optional
//!   whole-batch timeout and retry backoff.
//! - **[`DirectoryStore`]** / **[`HubClient`]**: content-addressed local
//!   storage and a remote registry for definitions.
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_prompt_batch::{Args, BatchOptions, ExecCtx, HttpBackend, PromptFunction, RequestConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::builder("https://api.openai.com")
//!         .backend(Arc::new(HttpBackend::new().with_api_key("sk-...")))
//!         .build();
//!
//!     let summarize = PromptFunction::new(RequestConfig::new("gpt-4o-mini").with_temperature(0.2))
//!         .with_system_message("You write one-sentence summaries.")
//!         .with_prompt_template("Summarize: {{ text }}")?;
//!
//!     let batch: Vec<Args> = ["first document", "second document"]
//!         .iter()
//!         .map(|text| Args::from([("text".to_string(), json!(text))]))
//!         .collect();
//!
//!     let results = summarize.run_batch(&ctx, batch, &BatchOptions::default()).await?;
//!     for result in results {
//!         match result {
//!             Some(response) => println!("{}", response.content().unwrap_or_default()),
//!             None => println!("<failed>"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod definition;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod hub;
pub mod messages;
pub mod request;
pub mod store;
pub mod template;

pub use backend::{Backend, BackoffConfig, CompletionResponse, HttpBackend, MockBackend};
pub use batch::BatchOptions;
pub use definition::PromptFunction;
pub use error::{ArgumentViolation, PromptError, Result, Slot};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use hub::{HubClient, HubConfig, HubRecord, RegistryClient};
pub use messages::{compile, ChatMessage, MessageSpec, Role};
pub use request::{RequestConfig, Stop};
pub use store::{load_config_dir, DirectoryStore, Persister, SaveOutcome};
pub use template::{extract_free_variables, Args, Template};
