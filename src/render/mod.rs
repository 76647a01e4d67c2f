//! Rendering compiled templates.
//!
//! A [`Renderer`] owns all per-render state (blocks, macros, the logic
//! stack) so a [`Template`] itself is never mutated. Sub-templates pulled in
//! by `include`, `extends`, `embed`, `use` and `import` get their own
//! renderer sharing the same engine and execution mode.

mod expression;
mod logic;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

use futures_util::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{TagType, Token};
use crate::engine::TwigEngine;
use crate::error::{TwigError, TwigResult};
use crate::interface::Context;
use crate::path;
use crate::promise::ExecutionMode;
use crate::registry::filters;
use crate::template::{Template, TemplateOptions, TemplateParams};
use crate::value::{Macro, MacroTable, Object, Value};

static SPACELESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("spaceless pattern is valid"));

/// What a finished render produced.
pub(crate) struct Outcome {
    pub text: Value,
    pub blocks: Object,
    pub macros: Object,
}

#[derive(Default)]
struct RenderState {
    blocks: IndexMap<String, Value>,
    imported_blocks: Vec<String>,
    original_block_tokens: HashMap<String, Vec<Token>>,
    extend: Option<Value>,
    parse_stack: Vec<TagType>,
    macros: MacroTable,
    /// The scope the render started with; `setcapture` writes here too.
    context: Context,
}

pub(crate) struct Renderer {
    engine: TwigEngine,
    template: Rc<Template>,
    options: Rc<TemplateOptions>,
    mode: ExecutionMode,
    state: RenderState,
}

impl Renderer {
    pub(crate) fn new(
        engine: TwigEngine,
        template: Rc<Template>,
        options: Rc<TemplateOptions>,
        mode: ExecutionMode,
        blocks: Object,
    ) -> Self {
        Self {
            engine,
            template,
            options,
            mode,
            state: RenderState {
                blocks: blocks.into_iter().collect(),
                ..RenderState::default()
            },
        }
    }

    /// Renders the template, then its parent if it `extends` one.
    pub(crate) fn run(mut self, context: Context) -> LocalBoxFuture<'static, TwigResult<Outcome>> {
        async move {
            log::debug!(
                "rendering template {}",
                self.template.id().unwrap_or("<inline>")
            );
            self.state.context = context.clone();
            let template = Rc::clone(&self.template);
            let text = self.parse(&template.tokens, &context).await?;

            let Some(extend) = self.state.extend.take() else {
                return Ok(Outcome {
                    text,
                    blocks: std::mem::take(&mut self.state.blocks).into_iter().collect(),
                    macros: self.state.macros.borrow().clone(),
                });
            };

            let parent = match self.resolve_extend(extend).await {
                Ok(parent) => parent,
                Err(err) => {
                    let text = self.handle_error(err)?;
                    return Ok(Outcome {
                        text,
                        blocks: Object::new(),
                        macros: Object::new(),
                    });
                }
            };
            let blocks = std::mem::take(&mut self.state.blocks).into_iter().collect();
            let macros = self.state.macros.borrow().clone();
            let renderer = Self::new(
                self.engine.clone(),
                parent,
                Rc::clone(&self.options),
                self.mode,
                blocks,
            );
            let mut outcome = renderer.run(context).await?;
            outcome.macros = macros;
            Ok(outcome)
        }
        .boxed_local()
    }

    async fn resolve_extend(&mut self, extend: Value) -> TwigResult<Rc<Template>> {
        if let Value::Template(template) = extend {
            return Ok(template);
        }
        let file = extend.to_string();
        if self.options.allow_inline_includes {
            if let Some(template) = self.engine.template(&file) {
                return Ok(template);
            }
        }
        let url = path::parse_path(&self.template, &file)?;
        let mut params = TemplateParams::new()
            .id(url.as_str())
            .method(self.loader_method())
            .options((*self.options).clone());
        if let Some(base) = &self.template.base {
            params = params.base(base.as_str());
        }
        self.engine.load_template(&url, params).await
    }

    /// Parses a token list, applying the error policy at this level.
    pub(crate) fn parse<'a>(
        &'a mut self,
        tokens: &'a [Token],
        context: &'a Context,
    ) -> LocalBoxFuture<'a, TwigResult<Value>> {
        async move {
            match self.parse_tokens(tokens, context).await {
                Ok(output) => Ok(output),
                Err(err) => self.handle_error(err),
            }
        }
        .boxed_local()
    }

    async fn parse_tokens(&mut self, tokens: &[Token], context: &Context) -> TwigResult<Value> {
        let mut pieces = Vec::with_capacity(tokens.len());
        let mut chain = true;
        for token in tokens {
            log::trace!("parsing token {:?}", token);
            match token {
                Token::Raw(text) => pieces.push(Value::markup(text.as_str())),
                Token::Output(expression) => {
                    pieces.push(expression::evaluate(self, expression, context).await?);
                }
                Token::Logic(logic) => {
                    self.state.parse_stack.push(logic.kind.tag_type());
                    let result = logic::parse(self, logic, context, chain).await;
                    self.state.parse_stack.pop();
                    let result = result?;
                    chain = result.chain;
                    if let Some(output) = result.output {
                        pieces.push(output);
                    }
                }
            }
        }
        Ok(self.output(pieces))
    }

    fn handle_error(&self, err: TwigError) -> TwigResult<Value> {
        if self.options.rethrow || err == TwigError::AsyncInSyncMode {
            return Err(err.in_template(self.template.id()));
        }
        log::error!(
            "Error parsing twig template {}: {}",
            self.template.id().unwrap_or("<inline>"),
            err
        );
        if self.engine.is_debug() {
            Ok(Value::from(format!("TwigException: {}", err)))
        } else {
            Ok(Value::from(""))
        }
    }

    /// Joins rendered pieces, escaping them when `autoescape` is on.
    fn output(&self, pieces: Vec<Value>) -> Value {
        let Some(strategy) = self.options.autoescape else {
            return Value::String(pieces.iter().map(ToString::to_string).collect());
        };
        let mut joined = String::new();
        for piece in pieces {
            let safe = match &piece {
                Value::Markup(markup) => markup.is_safe_for(strategy),
                other => !other.is_js_truthy(),
            };
            if safe {
                joined.push_str(&piece.to_string());
            } else {
                joined.push_str(&filters::escape(&piece, strategy).to_string());
            }
        }
        Value::markup(joined)
    }

    fn loader_method(&self) -> String {
        if self.template.path.is_some() {
            return "fs".to_string();
        }
        if self.template.url.is_some() {
            return "ajax".to_string();
        }
        self.template
            .method
            .clone()
            .unwrap_or_else(|| "fs".to_string())
    }

    /// Resolves a template reference made from inside this template.
    async fn import_file(&self, file: Value) -> TwigResult<Rc<Template>> {
        if let Value::Template(template) = file {
            return Ok(template);
        }
        let file = file.to_string();
        let options = (*self.options).clone();

        if self.template.url.is_none() && self.options.allow_inline_includes {
            let file = if self.template.path.is_some() {
                path::parse_path(&self.template, &file)?
            } else {
                file
            };
            if let Some(template) = self.engine.template(&file) {
                return Ok(template);
            }
            let params = TemplateParams::new()
                .id(file.as_str())
                .path(file.as_str())
                .method(self.loader_method())
                .options(options);
            return self.engine.load_template(&file, params).await;
        }

        let url = path::parse_path(&self.template, &file)?;
        let mut params = TemplateParams::new()
            .id(url.as_str())
            .method(self.loader_method())
            .options(options);
        if let Some(base) = &self.template.base {
            params = params.base(base.as_str());
        }
        self.engine.load_template(&url, params).await
    }

    /// Renders another template with this renderer's engine, options and mode.
    async fn render_sub(
        &self,
        template: Rc<Template>,
        context: Context,
        blocks: Object,
    ) -> TwigResult<Outcome> {
        Self::new(
            self.engine.clone(),
            template,
            Rc::clone(&self.options),
            self.mode,
            blocks,
        )
        .run(context)
        .await
    }

    /// The `block(name)` function: re-renders the block from its original
    /// tokens when known.
    async fn render_block(&mut self, name: &str) -> TwigResult<Value> {
        let Some(tokens) = self.state.original_block_tokens.get(name).cloned() else {
            return Ok(self.state.blocks.get(name).cloned().unwrap_or_default());
        };
        let context = self.state.context.clone();
        let output = self.parse(&tokens, &context).await?;
        self.state
            .blocks
            .insert(name.to_string(), output.clone());
        Ok(output)
    }

    /// Invokes a macro in a fresh renderer over the macro's own template.
    fn call_macro(
        &self,
        definition: Rc<Macro>,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'static, TwigResult<Value>> {
        let engine = self.engine.clone();
        let mode = self.mode;
        async move {
            let mut renderer = Self::new(
                engine,
                Rc::clone(&definition.template),
                Rc::clone(&definition.options),
                mode,
                Object::new(),
            );
            renderer.state.macros = Rc::clone(&definition.macros);

            let scope = Context::new();
            scope.set("_self", Value::object(definition.macros.borrow().clone()));
            for (index, parameter) in definition.parameters.iter().enumerate() {
                let value = match (args.get(index), &parameter.default) {
                    (Some(arg), _) if !arg.is_undefined() => arg.clone(),
                    (_, Some(default)) => {
                        expression::evaluate(
                            &mut renderer,
                            default,
                            &definition.definition_context,
                        )
                        .await?
                    }
                    (_, None) => Value::Undefined,
                };
                scope.set(parameter.name.as_str(), value);
            }

            renderer.state.context = scope.clone();
            renderer.parse(&definition.body, &scope).await
        }
        .boxed_local()
    }

    fn spaceless(rendered: &Value) -> Value {
        let collapsed = SPACELESS.replace_all(&rendered.to_string(), "><").into_owned();
        Value::markup(collapsed.trim())
    }
}
