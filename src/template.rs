//! Static analysis and strict rendering of prompt templates.
//!
//! Templates use Jinja syntax (`{{ name }}`, `{% for x in items %}`) through
//! [`minijinja`]. [`extract_free_variables`] parses a template without
//! evaluating it; [`render`] substitutes an argument map and refuses to
//! produce output when any referenced variable is missing.

use crate::error::{PromptError, Result};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Argument map passed to a template: variable name to JSON value.
pub type Args = BTreeMap<String, Value>;

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

fn map_error(err: minijinja::Error) -> PromptError {
    match err.kind() {
        ErrorKind::SyntaxError => PromptError::TemplateSyntax(err.to_string()),
        _ => PromptError::TemplateRender(err.to_string()),
    }
}

/// Return the names a template reads from its context.
///
/// Locally bound names (loop targets, `{% set %}` assignments, macro
/// parameters) are not reported. Attribute access reports only the root
/// name, so `{{ user.name }}` yields `user`.
///
/// # Example
///
/// ```
/// use llm_prompt_batch::template::extract_free_variables;
///
/// let vars = extract_free_variables("{% for x in items %}{{ x }} {{ sep }}{% endfor %}").unwrap();
/// assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec!["items", "sep"]);
/// ```
pub fn extract_free_variables(template: &str) -> Result<BTreeSet<String>> {
    let env = environment();
    let parsed = env.template_from_str(template).map_err(map_error)?;
    Ok(parsed.undeclared_variables(false).into_iter().collect())
}

/// Render a template against `args`.
///
/// Fails with [`PromptError::TemplateRender`] if the template touches a
/// variable that `args` does not define. No partial output is returned.
///
/// ```
/// use llm_prompt_batch::template::{render, Args};
/// use serde_json::json;
///
/// let mut args = Args::new();
/// args.insert("name".into(), json!("Alice"));
/// assert_eq!(render("Hello {{ name }}!", &args).unwrap(), "Hello Alice!");
/// ```
pub fn render(template: &str, args: &Args) -> Result<String> {
    environment().render_str(template, args).map_err(map_error)
}

/// A template string paired with its statically extracted free variables.
///
/// Parsing happens once, at construction; rendering reuses the variable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    variables: BTreeSet<String>,
}

impl Template {
    /// Parse `source` and extract its free variables.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let variables = extract_free_variables(&source)?;
        Ok(Self { source, variables })
    }

    /// The raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free variables referenced by the template.
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Whether the template needs any arguments at all.
    pub fn has_variables(&self) -> bool {
        !self.variables.is_empty()
    }

    /// Render with `args`. See [`render`].
    pub fn render(&self, args: &Args) -> Result<String> {
        render(&self.source, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(t: &str) -> Vec<String> {
        extract_free_variables(t).unwrap().into_iter().collect()
    }

    #[test]
    fn test_extract_simple() {
        assert_eq!(vars("Hello {{ name }}, welcome to {{ place }}"), vec!["name", "place"]);
    }

    #[test]
    fn test_extract_no_variables() {
        assert!(vars("static prompt").is_empty());
    }

    #[test]
    fn test_extract_order_independent() {
        assert_eq!(vars("{{ b }} {{ a }}"), vars("{{ a }} {{ b }}"));
    }

    #[test]
    fn test_extract_repeated_variable_once() {
        assert_eq!(vars("{{ x }} and {{ x }} again"), vec!["x"]);
    }

    #[test]
    fn test_extract_excludes_loop_variable() {
        assert_eq!(vars("{% for item in items %}- {{ item }}\n{% endfor %}"), vec!["items"]);
    }

    #[test]
    fn test_extract_excludes_set_binding() {
        assert_eq!(vars("{% set greeting = 'hi' %}{{ greeting }} {{ who }}"), vec!["who"]);
    }

    #[test]
    fn test_extract_attribute_reports_root() {
        assert_eq!(vars("{{ user.name }}"), vec!["user"]);
    }

    #[test]
    fn test_extract_syntax_error() {
        let err = extract_free_variables("Hello {{ name").unwrap_err();
        assert!(matches!(err, PromptError::TemplateSyntax(_)));
    }

    #[test]
    fn test_render_substitutes() {
        let mut args = Args::new();
        args.insert("topic".into(), json!("rust"));
        args.insert("n".into(), json!(3));
        assert_eq!(render("Give {{ n }} facts about {{ topic }}", &args).unwrap(), "Give 3 facts about rust");
    }

    #[test]
    fn test_render_missing_variable_fails() {
        let args = Args::new();
        let err = render("Hello {{ name }}", &args).unwrap_err();
        assert!(matches!(err, PromptError::TemplateRender(_)));
    }

    #[test]
    fn test_render_loop_over_list() {
        let mut args = Args::new();
        args.insert("items".into(), json!(["a", "b"]));
        assert_eq!(render("{% for i in items %}{{ i }};{% endfor %}", &args).unwrap(), "a;b;");
    }

    #[test]
    fn test_template_parse_caches_variables() {
        let t = Template::parse("{{ a }}{{ b }}").unwrap();
        assert!(t.has_variables());
        assert_eq!(t.variables().len(), 2);
        assert_eq!(t.source(), "{{ a }}{{ b }}");

        let literal = Template::parse("plain").unwrap();
        assert!(!literal.has_variables());
        assert_eq!(literal.render(&Args::new()).unwrap(), "plain");
    }
}
