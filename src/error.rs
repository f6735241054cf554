use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which message slot of a prompt an argument problem refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The user-facing prompt (`prompt` / `prompt_template`).
    Prompt,
    /// The system message (`system_message` / `system_message_template`).
    SystemMessage,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Prompt => f.write_str("prompt"),
            Slot::SystemMessage => f.write_str("system message"),
        }
    }
}

/// The specific rule an illegal literal/template/argument mix broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentViolation {
    /// Both the literal text and the template were supplied for one slot.
    MutuallyExclusive(Slot),
    /// Arguments were supplied for a slot that has no template.
    OrphanedArguments(Slot),
    /// The template has no free variables but arguments were supplied.
    UnnecessaryArguments(Slot),
    /// The template has free variables but no arguments were supplied.
    MissingArguments(Slot),
    /// Argument keys that no template slot references.
    UnknownArguments(Vec<String>),
}

impl fmt::Display for ArgumentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MutuallyExclusive(slot) => write!(
                f,
                "{slot} and {slot} template are mutually exclusive"
            ),
            Self::OrphanedArguments(slot) => {
                write!(f, "orphaned arguments: {slot} arguments given without a {slot} template")
            }
            Self::UnnecessaryArguments(slot) => write!(
                f,
                "unnecessary arguments: {slot} template has no variables but arguments were given"
            ),
            Self::MissingArguments(slot) => write!(
                f,
                "missing arguments: {slot} template requires arguments but none were given"
            ),
            Self::UnknownArguments(keys) => {
                write!(f, "unknown arguments: {}", keys.join(", "))
            }
        }
    }
}

/// Errors produced while compiling, dispatching, and persisting prompts.
#[derive(Error, Debug)]
pub enum PromptError {
    /// The template text is not syntactically valid.
    #[error("Template syntax error: {0}")]
    TemplateSyntax(String),

    /// The caller supplied an illegal mix of literal text, templates and arguments.
    #[error("Invalid argument combination: {0}")]
    InvalidArgumentCombination(ArgumentViolation),

    /// A variable referenced by a template could not be resolved at render time.
    #[error("Template render error: {0}")]
    TemplateRender(String),

    /// The completion service failed for a reason other than HTTP transport.
    #[error("Completion service failed: {0}")]
    Service(String),

    /// The whole batch did not finish within its deadline.
    #[error("Batch did not complete within {0:?}")]
    BatchTimeout(Duration),

    /// No stored configuration exists at the resolved path.
    #[error("No configuration found at {}", .0.display())]
    NotFound(PathBuf),

    /// Stored message artifacts cannot be mapped back to an order and role.
    #[error("Corrupt configuration store at {}: {reason}", .path.display())]
    CorruptStore { path: PathBuf, reason: String },

    /// A required configuration value was not supplied.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure in the directory store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations and the
    /// hub client when the remote side answers with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Invalid configuration detected before any work started.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PromptError {
    /// Whether this error came from the remote completion service or its transport.
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            PromptError::Service(_) | PromptError::Request(_) | PromptError::HttpError { .. }
        )
    }
}

impl From<ArgumentViolation> for PromptError {
    fn from(violation: ArgumentViolation) -> Self {
        PromptError::InvalidArgumentCombination(violation)
    }
}

impl From<anyhow::Error> for PromptError {
    fn from(err: anyhow::Error) -> Self {
        PromptError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;
