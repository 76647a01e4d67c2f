use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{TwigError, TwigResult};
use crate::interface::{
    Accessor, Context, FileSystemLoader, GetterProbing, LoadRequest, Loader, TemplateSource,
    TwigInterface,
};
use crate::logic::CustomTag;
use crate::promise::{ExecutionMode, run_sync};
use crate::registry::{Call, FilterFn, FunctionFn, Registry, TestFn};
use crate::render::{Outcome, Renderer};
use crate::template::{Template, TemplateOptions, TemplateParams};
use crate::value::{Object, Value};

/// What [`TwigEngine::render_with_params`] should return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputKind {
    #[default]
    Text,
    /// The blocks the template defined.
    Blocks,
    /// The macros the template defined.
    Macros,
}

/// Extra inputs for a render.
#[derive(Debug, Clone, Default)]
pub struct RenderParams {
    pub output: OutputKind,
    /// Blocks that take precedence over the template's own, as a child
    /// template would provide them.
    pub blocks: Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Blocks(Object),
    Macros(Object),
}

struct EngineInner {
    registry: RefCell<Registry>,
    templates: RefCell<HashMap<String, Rc<Template>>>,
    loaders: RefCell<IndexMap<String, Rc<dyn Loader>>>,
    accessor: RefCell<Rc<dyn Accessor>>,
    cache: Cell<bool>,
    debug: Cell<bool>,
    default_options: RefCell<TemplateOptions>,
}

/// `TwigEngine` is the primary implementation of the `TwigInterface` trait,
/// providing a complete Twig template engine.
///
/// The engine owns the template registry, the filters, functions, tests and
/// tags available to templates, and the loaders used to fetch templates by
/// reference. It is a cheap handle: clones share the same state.
///
/// # Examples
///
/// ```
/// use twiglet::{Context, TwigEngine, TwigInterface};
///
/// // Create a new engine
/// let mut engine = TwigEngine::new();
///
/// // Add a template
/// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
///
/// // Setup context
/// let mut context = Context::new();
/// context.insert("name", "World");
///
/// // Render template
/// let output = engine.render("greeting", Some(&context)).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
#[derive(Clone)]
pub struct TwigEngine {
    inner: Rc<EngineInner>,
}

impl TwigEngine {
    /// Creates a new engine with the built-in extensions, the `fs` loader
    /// and template caching enabled.
    pub fn new() -> Self {
        let mut loaders: IndexMap<String, Rc<dyn Loader>> = IndexMap::new();
        loaders.insert("fs".to_string(), Rc::new(FileSystemLoader));
        Self {
            inner: Rc::new(EngineInner {
                registry: RefCell::new(Registry::default()),
                templates: RefCell::new(HashMap::new()),
                loaders: RefCell::new(loaders),
                accessor: RefCell::new(Rc::new(GetterProbing)),
                cache: Cell::new(true),
                debug: Cell::new(false),
                default_options: RefCell::new(TemplateOptions::default()),
            }),
        }
    }

    /// Registers a filter, replacing any filter of the same name.
    ///
    /// # Examples
    ///
    /// ```
    /// use twiglet::{TwigEngine, TwigInterface, Value};
    ///
    /// let mut engine = TwigEngine::new();
    /// engine.add_filter("shout", |value: &Value, _: &[Value]| {
    ///     Ok(Value::from(format!("{}!", value)))
    /// });
    /// engine.add_template("t", "{{ 'hey'|shout }}").unwrap();
    /// assert_eq!(engine.render("t", None).unwrap(), "hey!");
    /// ```
    pub fn add_filter<N, F>(&self, name: N, filter: F)
    where
        N: Into<String>,
        F: Fn(&Value, &[Value]) -> TwigResult<Value> + 'static,
    {
        let filter: FilterFn = Rc::new(filter);
        self.inner
            .registry
            .borrow_mut()
            .filters
            .insert(name.into(), filter);
    }

    /// Registers a function, replacing any function of the same name.
    /// Registered functions take precedence over callables in the context.
    pub fn add_function<N, F>(&self, name: N, function: F)
    where
        N: Into<String>,
        F: Fn(&Call<'_>, &[Value]) -> TwigResult<Value> + 'static,
    {
        let function: FunctionFn = Rc::new(function);
        self.inner
            .registry
            .borrow_mut()
            .functions
            .insert(name.into(), function);
    }

    /// Registers a test for `is` expressions.
    pub fn add_test<N, F>(&self, name: N, test: F)
    where
        N: Into<String>,
        F: Fn(&Value, &[Value]) -> TwigResult<Value> + 'static,
    {
        let test: TestFn = Rc::new(test);
        self.inner
            .registry
            .borrow_mut()
            .tests
            .insert(name.into(), test);
    }

    /// Registers a custom logic tag. Only templates compiled afterwards see it.
    pub fn add_tag<T: CustomTag + 'static>(&self, tag: T) {
        self.inner.registry.borrow_mut().add_tag(Rc::new(tag));
    }

    /// Registers a loader under `method`, replacing any existing one.
    pub fn register_loader<N: Into<String>, L: Loader + 'static>(&self, method: N, loader: L) {
        self.inner
            .loaders
            .borrow_mut()
            .insert(method.into(), Rc::new(loader));
    }

    pub fn unregister_loader<N: AsRef<str>>(&self, method: N) {
        self.inner.loaders.borrow_mut().shift_remove(method.as_ref());
    }

    pub fn has_loader<N: AsRef<str>>(&self, method: N) -> bool {
        self.inner.loaders.borrow().contains_key(method.as_ref())
    }

    /// Replaces the strategy used for `object.key` lookups.
    pub fn set_accessor<A: Accessor + 'static>(&self, accessor: A) {
        *self.inner.accessor.borrow_mut() = Rc::new(accessor);
    }

    /// With caching on (the default), templates with an id are reused and
    /// duplicate ids are rejected.
    pub fn set_cache(&self, enabled: bool) {
        self.inner.cache.set(enabled);
    }

    /// With debug on, swallowed render errors are written into the output.
    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.set(enabled);
    }

    /// Options for templates created without explicit options.
    pub fn set_default_options(&self, options: TemplateOptions) {
        *self.inner.default_options.borrow_mut() = options;
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug.get()
    }

    pub fn is_cache(&self) -> bool {
        self.inner.cache.get()
    }

    pub(crate) fn filter(&self, name: &str) -> Option<FilterFn> {
        self.inner.registry.borrow().filter(name)
    }

    pub(crate) fn function(&self, name: &str) -> Option<FunctionFn> {
        self.inner.registry.borrow().function(name)
    }

    pub(crate) fn test(&self, name: &str) -> Option<TestFn> {
        self.inner.registry.borrow().test(name)
    }

    pub(crate) fn tag(&self, name: &str) -> Option<Rc<dyn CustomTag>> {
        self.inner
            .registry
            .borrow()
            .tags
            .iter()
            .find(|tag| tag.name() == name)
            .map(Rc::clone)
    }

    pub(crate) fn accessor(&self) -> Rc<dyn Accessor> {
        Rc::clone(&self.inner.accessor.borrow())
    }

    /// The loader for `method`, falling back to `fs`.
    pub(crate) fn loader(&self, method: &str) -> Option<Rc<dyn Loader>> {
        let loaders = self.inner.loaders.borrow();
        loaders.get(method).or_else(|| loaders.get("fs")).map(Rc::clone)
    }

    /// Compiles a template. A template with an id is stored in the registry.
    ///
    /// # Errors
    /// - `TwigError::InvalidTemplateId` for the reserved id `prototype`.
    /// - `TwigError::TemplateExists` if caching is on and the id is taken.
    /// - `TwigError::Parse` or `TwigError::Syntax` if compilation fails.
    pub fn create_template<S: Into<TemplateSource>>(
        &self,
        source: S,
        params: TemplateParams,
    ) -> TwigResult<Rc<Template>> {
        if let Some(id) = &params.id {
            self.validate_id(id)?;
        }
        let default_options = self.inner.default_options.borrow().clone();
        let template = match source.into() {
            TemplateSource::Text(text) => {
                let tags = self.inner.registry.borrow().tags.clone();
                Template::compile(&text, &tags, params, default_options)?
            }
            TemplateSource::Compiled(tokens) => {
                Template::from_tokens(tokens, params, default_options)
            }
        };
        let template = Rc::new(template);
        if template.id.is_some() {
            self.save_template(Rc::clone(&template))?;
        }
        log::debug!(
            "created template {}",
            template.id().unwrap_or("<inline>")
        );
        Ok(template)
    }

    fn validate_id(&self, id: &str) -> TwigResult<()> {
        if id == "prototype" {
            return Err(TwigError::InvalidTemplateId { id: id.to_string() });
        }
        if self.is_cache() && self.inner.templates.borrow().contains_key(id) {
            return Err(TwigError::TemplateExists { id: id.to_string() });
        }
        Ok(())
    }

    /// Looks a template up in the registry by id.
    pub fn template<T: AsRef<str>>(&self, id: T) -> Option<Rc<Template>> {
        self.inner.templates.borrow().get(id.as_ref()).map(Rc::clone)
    }

    /// Stores a template in the registry under its id.
    ///
    /// # Errors
    /// - `TwigError::InvalidTemplateId` if the template has no id.
    pub fn save_template(&self, template: Rc<Template>) -> TwigResult<()> {
        let Some(id) = template.id.clone() else {
            return Err(TwigError::InvalidTemplateId {
                id: String::new(),
            });
        };
        self.inner.templates.borrow_mut().insert(id, template);
        Ok(())
    }

    /// Loads a template through the loader named by `params.method`
    /// (default `fs`). With caching on, a template already registered under
    /// the id is returned without loading.
    ///
    /// # Errors
    /// - `TwigError::TemplateNotFound` if the loader has nothing at `location`.
    /// - `TwigError::Loader` if the loader fails.
    /// - Compilation errors of the loaded source.
    pub async fn load_template(
        &self,
        location: &str,
        mut params: TemplateParams,
    ) -> TwigResult<Rc<Template>> {
        let id = params.id.clone().unwrap_or_else(|| location.to_string());
        if self.is_cache() {
            if let Some(cached) = self.template(&id) {
                log::debug!("template cache hit for {}", id);
                return Ok(cached);
            }
        }

        let method = params.method.clone().unwrap_or_else(|| "fs".to_string());
        let loader = self
            .loader(&method)
            .ok_or_else(|| TwigError::Loader(format!("No loader registered for {}", method)))?;
        log::debug!("loading template {} with the {} loader", location, method);
        let request = LoadRequest {
            location,
            id: &id,
            base: params.base.as_deref(),
        };
        let source = loader
            .load(request)
            .await?
            .ok_or_else(|| TwigError::TemplateNotFound {
                location: location.to_string(),
            })?;

        if method == "fs" && params.path.is_none() {
            params.path = Some(location.to_string());
        }
        params.id = Some(id);
        self.create_template(source, params)
    }

    /// Renders a compiled template synchronously.
    ///
    /// # Errors
    /// - `TwigError::AsyncInSyncMode` if an extension suspends.
    /// - Render errors when the template's `rethrow` option is on.
    pub fn render_template(
        &self,
        template: &Rc<Template>,
        context: Option<&Context>,
    ) -> TwigResult<String> {
        let outcome = run_sync(self.run(template, context, Object::new(), ExecutionMode::Sync))?;
        Ok(outcome.text.to_string())
    }

    /// Renders a compiled template, awaiting extensions that suspend.
    ///
    /// # Errors
    /// - Render errors when the template's `rethrow` option is on.
    pub async fn render_template_async(
        &self,
        template: &Rc<Template>,
        context: Option<&Context>,
    ) -> TwigResult<String> {
        let outcome = self
            .run(template, context, Object::new(), ExecutionMode::Async)
            .await?;
        Ok(outcome.text.to_string())
    }

    /// Renders synchronously and returns what `params.output` asks for.
    ///
    /// # Errors
    /// See [`TwigEngine::render_template`].
    pub fn render_with_params(
        &self,
        template: &Rc<Template>,
        context: Option<&Context>,
        params: RenderParams,
    ) -> TwigResult<Rendered> {
        let RenderParams { output, blocks } = params;
        let outcome = run_sync(self.run(template, context, blocks, ExecutionMode::Sync))?;
        Ok(match output {
            OutputKind::Text => Rendered::Text(outcome.text.to_string()),
            OutputKind::Blocks => Rendered::Blocks(outcome.blocks),
            OutputKind::Macros => Rendered::Macros(outcome.macros),
        })
    }

    /// Renders a registered template by id, awaiting extensions that suspend.
    ///
    /// # Errors
    /// - `TwigError::TemplateNotFound` if no template has the id.
    /// - Render errors when the template's `rethrow` option is on.
    pub async fn render_async<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
    ) -> TwigResult<String> {
        let template = self.registered(template_name.as_ref())?;
        self.render_template_async(&template, context).await
    }

    fn registered(&self, name: &str) -> TwigResult<Rc<Template>> {
        self.template(name).ok_or_else(|| TwigError::TemplateNotFound {
            location: name.to_string(),
        })
    }

    /// Renders in a copy of the caller's scope so `set` never leaks back.
    async fn run(
        &self,
        template: &Rc<Template>,
        context: Option<&Context>,
        blocks: Object,
        mode: ExecutionMode,
    ) -> TwigResult<Outcome> {
        let context = context.map_or_else(Context::new, Context::child);
        Renderer::new(
            self.clone(),
            Rc::clone(template),
            Rc::clone(&template.options),
            mode,
            blocks,
        )
        .run(context)
        .await
    }
}

impl Default for TwigEngine {
    /// Creates a default `TwigEngine` instance by calling `new()`.
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TwigEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwigEngine")
            .field("templates", &self.inner.templates.borrow().len())
            .field("cache", &self.is_cache())
            .field("debug", &self.is_debug())
            .finish_non_exhaustive()
    }
}

impl TwigInterface for TwigEngine {
    /// Adds a new template to the engine with the given name and content.
    ///
    /// # Arguments
    ///
    /// * `name` - The id to register this template under
    /// * `content` - The template source
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the template was successfully added
    /// * `Err(TwigError::TemplateExists)` if caching is on and the id is taken
    /// * `Err(TwigError::Parse)` or `Err(TwigError::Syntax)` if the template
    ///   contains syntax errors
    ///
    /// # Examples
    ///
    /// ```
    /// use twiglet::{TwigEngine, TwigInterface};
    ///
    /// let mut engine = TwigEngine::new();
    /// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
    /// assert!(engine.add_template("greeting", "again").is_err());
    /// ```
    fn add_template<N: AsRef<str>, C: Into<String>>(
        &mut self,
        name: N,
        content: C,
    ) -> TwigResult<()> {
        self.create_template(content.into(), TemplateParams::new().id(name.as_ref()))
            .map(|_| ())
    }

    /// Renders the template with the given id using the provided context.
    ///
    /// # Arguments
    ///
    /// * `template_name` - The id of the template to render
    /// * `context` - Optional context with variables for template rendering
    ///
    /// # Returns
    ///
    /// * `Ok(String)` containing the rendered template content
    /// * `Err(TwigError::TemplateNotFound)` if no template has the id
    /// * `Err(TwigError::AsyncInSyncMode)` if an extension suspends
    /// * Other render errors when the template's `rethrow` option is on
    ///
    /// # Examples
    ///
    /// ```
    /// use twiglet::{Context, TwigEngine, TwigInterface};
    ///
    /// let mut engine = TwigEngine::new();
    /// engine.add_template("list", "{% for i in items %}{{ i }}{% endfor %}").unwrap();
    ///
    /// let mut context = Context::new();
    /// context.insert("items", vec![1, 2, 3]);
    ///
    /// let output = engine.render("list", Some(&context)).unwrap();
    /// assert_eq!(output, "123");
    /// ```
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
    ) -> TwigResult<String> {
        let template = self.registered(template_name.as_ref())?;
        self.render_template(&template, context)
    }
}
