use std::rc::Rc;

use crate::ast::Token;
use crate::error::TwigResult;
use crate::interface::Namespaces;
use crate::logic::CustomTag;
use crate::parser;
use crate::value::EscapeStrategy;

/// Per-template render options.
///
/// # Example
///
/// ```rust
/// use twiglet::{EscapeStrategy, TemplateOptions};
///
/// let options = TemplateOptions::new()
///     .autoescape(Some(EscapeStrategy::Html))
///     .strict_variables(true)
///     .namespace("theme", "templates/theme/");
/// assert!(options.is_strict_variables());
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOptions {
    pub(crate) strict_variables: bool,
    pub(crate) autoescape: Option<EscapeStrategy>,
    pub(crate) allow_inline_includes: bool,
    pub(crate) rethrow: bool,
    pub(crate) namespaces: Namespaces,
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on key access through `null` or `undefined` instead of
    /// yielding `undefined`.
    pub const fn strict_variables(mut self, enabled: bool) -> Self {
        self.strict_variables = enabled;
        self
    }

    /// Escape every output piece with the given strategy.
    pub const fn autoescape(mut self, strategy: Option<EscapeStrategy>) -> Self {
        self.autoescape = strategy;
        self
    }

    /// Look templates up by id in the engine registry before loading them.
    pub const fn allow_inline_includes(mut self, enabled: bool) -> Self {
        self.allow_inline_includes = enabled;
        self
    }

    /// Return render errors to the caller instead of logging them.
    pub const fn rethrow(mut self, enabled: bool) -> Self {
        self.rethrow = enabled;
        self
    }

    pub fn namespace<N: Into<String>, P: Into<String>>(mut self, name: N, prefix: P) -> Self {
        self.namespaces.insert(name.into(), prefix.into());
        self
    }

    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub const fn is_strict_variables(&self) -> bool {
        self.strict_variables
    }

    pub const fn autoescape_strategy(&self) -> Option<EscapeStrategy> {
        self.autoescape
    }

    pub const fn is_allow_inline_includes(&self) -> bool {
        self.allow_inline_includes
    }

    pub const fn is_rethrow(&self) -> bool {
        self.rethrow
    }

    pub const fn namespace_map(&self) -> &Namespaces {
        &self.namespaces
    }
}

/// Where a template comes from and how it is identified.
///
/// Every field is optional; a template created from a string with no
/// params is an anonymous inline template.
#[derive(Debug, Clone, Default)]
pub struct TemplateParams {
    pub(crate) id: Option<String>,
    pub(crate) base: Option<String>,
    pub(crate) path: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) method: Option<String>,
    pub(crate) options: Option<TemplateOptions>,
}

macro_rules! param_setters {
    ($($field:ident),*) => {
        $(
            pub fn $field<T: Into<String>>(mut self, $field: T) -> Self {
                self.$field = Some($field.into());
                self
            }
        )*
    };
}

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    param_setters!(id, base, path, url, name, method);

    /// Overrides the engine's default options for this template.
    pub fn options(mut self, options: TemplateOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// A compiled template.
///
/// Templates are immutable once compiled; all per-render state lives in the
/// renderer, so one template can be rendered any number of times.
///
/// # Example
///
/// ```rust
/// use twiglet::{Context, TwigEngine, TemplateParams};
///
/// let engine = TwigEngine::new();
/// let template = engine
///     .create_template("Hello, {{ name }}!", TemplateParams::new().id("greeting"))
///     .unwrap();
///
/// let mut context = Context::new();
/// context.insert("name", "World");
///
/// let output = engine.render_template(&template, Some(&context)).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
#[derive(Debug, Default)]
pub struct Template {
    pub(crate) id: Option<String>,
    pub(crate) tokens: Vec<Token>,
    pub(crate) base: Option<String>,
    pub(crate) path: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) method: Option<String>,
    pub(crate) options: Rc<TemplateOptions>,
}

impl Template {
    /// Compiles `content` using only the built-in tags.
    ///
    /// # Errors
    /// Returns `TwigError::Parse` or `TwigError::Syntax` if the template
    /// syntax is invalid.
    pub fn new<T: AsRef<str>>(content: T) -> TwigResult<Self> {
        Self::compile(content.as_ref(), &[], TemplateParams::default(), TemplateOptions::default())
    }

    pub(crate) fn compile(
        content: &str,
        tags: &[Rc<dyn CustomTag>],
        params: TemplateParams,
        default_options: TemplateOptions,
    ) -> TwigResult<Self> {
        let tokens = parser::compile(content, tags)?;
        Ok(Self::from_tokens(tokens, params, default_options))
    }

    pub(crate) fn from_tokens(
        tokens: Vec<Token>,
        params: TemplateParams,
        default_options: TemplateOptions,
    ) -> Self {
        let TemplateParams {
            id,
            base,
            path,
            url,
            name,
            method,
            options,
        } = params;
        Self {
            id,
            tokens,
            base,
            path,
            url,
            name,
            method,
            options: Rc::new(options.unwrap_or(default_options)),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct TemplateHelper {
    id: Option<String>,
    tokens: Vec<Token>,
    base: Option<String>,
    path: Option<String>,
    url: Option<String>,
    name: Option<String>,
    method: Option<String>,
    options: TemplateOptions,
}

#[cfg(feature = "serde")]
impl serde::Serialize for Template {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        TemplateHelper {
            id: self.id.clone(),
            tokens: self.tokens.clone(),
            base: self.base.clone(),
            path: self.path.clone(),
            url: self.url.clone(),
            name: self.name.clone(),
            method: self.method.clone(),
            options: (*self.options).clone(),
        }
        .serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let helper = TemplateHelper::deserialize(deserializer)?;
        Ok(Self {
            id: helper.id,
            tokens: helper.tokens,
            base: helper.base,
            path: helper.path,
            url: helper.url,
            name: helper.name,
            method: helper.method,
            options: Rc::new(helper.options),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_params_fill_template() {
        let params = TemplateParams::new()
            .id("page")
            .path("views/page.twig")
            .options(TemplateOptions::new().rethrow(true));
        let template = Template::compile("hi", &[], params, TemplateOptions::default()).unwrap();
        assert_eq!(template.id(), Some("page"), "id kept");
        assert_eq!(template.path(), Some("views/page.twig"), "path kept");
        assert!(template.options().is_rethrow(), "explicit options win");
        assert_eq!(template.tokens(), &[Token::Raw("hi".to_string())], "compiled");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_default_options_apply() {
        let defaults = TemplateOptions::new().strict_variables(true);
        let template = Template::compile("", &[], TemplateParams::new(), defaults).unwrap();
        assert!(template.options().is_strict_variables(), "engine defaults used");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_invalid_template_fails() {
        assert!(Template::new("{% if a %}").is_err(), "unclosed if");
    }
}
