//! Message compilation: validate a literal/template/argument mix and render
//! it into an ordered, role-tagged message list.

use crate::error::{ArgumentViolation, PromptError, Result, Slot};
use crate::template::{Args, Template};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
    /// Result of a legacy function call.
    Function,
    /// Result of a tool call.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "function" => Ok(Role::Function),
            "tool" => Ok(Role::Tool),
            other => Err(PromptError::Other(format!("unknown message role '{}'", other))),
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Inputs to [`compile`]: one literal-or-template choice per slot, plus the
/// argument map for each template.
///
/// Empty strings and empty argument maps count as "not supplied".
///
/// # Example
///
/// ```
/// use llm_prompt_batch::messages::{compile, MessageSpec, Role};
/// use llm_prompt_batch::template::{Args, Template};
/// use serde_json::json;
///
/// let template = Template::parse("Summarize {{ text }}").unwrap();
/// let mut args = Args::new();
/// args.insert("text".into(), json!("the report"));
///
/// let messages = compile(
///     &MessageSpec::new()
///         .system_message("You are terse.")
///         .prompt_template(&template)
///         .prompt_args(&args),
/// )
/// .unwrap();
///
/// assert_eq!(messages[0].role, Role::System);
/// assert_eq!(messages[1].content, "Summarize the report");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSpec<'a> {
    pub prompt: Option<&'a str>,
    pub prompt_template: Option<&'a Template>,
    pub prompt_args: Option<&'a Args>,
    pub system_message: Option<&'a str>,
    pub system_message_template: Option<&'a Template>,
    pub system_message_args: Option<&'a Args>,
}

impl<'a> MessageSpec<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(mut self, prompt: &'a str) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn prompt_template(mut self, template: &'a Template) -> Self {
        self.prompt_template = Some(template);
        self
    }

    pub fn prompt_args(mut self, args: &'a Args) -> Self {
        self.prompt_args = Some(args);
        self
    }

    pub fn system_message(mut self, message: &'a str) -> Self {
        self.system_message = Some(message);
        self
    }

    pub fn system_message_template(mut self, template: &'a Template) -> Self {
        self.system_message_template = Some(template);
        self
    }

    pub fn system_message_args(mut self, args: &'a Args) -> Self {
        self.system_message_args = Some(args);
        self
    }
}

/// One slot's inputs after empty values are dropped.
struct SlotInput<'a> {
    slot: Slot,
    literal: Option<&'a str>,
    template: Option<&'a Template>,
    args: Option<&'a Args>,
}

impl<'a> SlotInput<'a> {
    fn new(
        slot: Slot,
        literal: Option<&'a str>,
        template: Option<&'a Template>,
        args: Option<&'a Args>,
    ) -> Self {
        Self {
            slot,
            literal: literal.filter(|s| !s.is_empty()),
            template: template.filter(|t| !t.source().is_empty()),
            args: args.filter(|a| !a.is_empty()),
        }
    }

    fn validate(&self) -> std::result::Result<(), ArgumentViolation> {
        if self.literal.is_some() && self.template.is_some() {
            return Err(ArgumentViolation::MutuallyExclusive(self.slot));
        }
        match (self.template, self.args) {
            (None, Some(_)) => Err(ArgumentViolation::OrphanedArguments(self.slot)),
            (Some(t), Some(_)) if !t.has_variables() => {
                Err(ArgumentViolation::UnnecessaryArguments(self.slot))
            }
            (Some(t), None) if t.has_variables() => {
                Err(ArgumentViolation::MissingArguments(self.slot))
            }
            _ => Ok(()),
        }
    }

    /// Template wins over literal; `None` when the slot is empty.
    fn render(&self) -> Result<Option<String>> {
        if let Some(template) = self.template {
            let empty = Args::new();
            return template.render(self.args.unwrap_or(&empty)).map(Some);
        }
        Ok(self.literal.map(str::to_string))
    }
}

/// Validate a [`MessageSpec`] and render it.
///
/// Rules are checked in a fixed order and the first violation wins: the
/// prompt slot (mutual exclusion, orphaned, unnecessary, missing arguments),
/// then the same four for the system-message slot. Output order is system
/// message first, then the user prompt. Empty slots produce no message, so an
/// all-empty `MessageSpec` yields an empty list; callers that need at least one
/// message enforce that themselves.
pub fn compile(spec: &MessageSpec<'_>) -> Result<Vec<ChatMessage>> {
    let prompt = SlotInput::new(
        Slot::Prompt,
        spec.prompt,
        spec.prompt_template,
        spec.prompt_args,
    );
    let system = SlotInput::new(
        Slot::SystemMessage,
        spec.system_message,
        spec.system_message_template,
        spec.system_message_args,
    );

    prompt.validate()?;
    system.validate()?;

    let mut messages = Vec::with_capacity(2);
    if let Some(content) = system.render()? {
        messages.push(ChatMessage::system(content));
    }
    if let Some(content) = prompt.render()? {
        messages.push(ChatMessage::user(content));
    }
    Ok(messages)
}
