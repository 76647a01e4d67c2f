//! Running logic tags.

use std::rc::Rc;

use crate::ast::{ExprToken, LogicKind, LogicToken, TagType, Token};
use crate::error::{TwigError, TwigResult};
use crate::interface::Context;
use crate::logic::{TagCall, TagOutput};
use crate::registry::functions::PARENT_PLACEHOLDER;
use crate::render::expression::{evaluate, evaluate_with};
use crate::render::Renderer;
use crate::value::{Macro, Object, Value};

pub(super) struct LogicResult {
    /// Whether a following `elseif`/`else` should still run.
    pub chain: bool,
    pub output: Option<Value>,
}

impl LogicResult {
    const fn silent(chain: bool) -> Self {
        Self {
            chain,
            output: None,
        }
    }

    const fn emit(chain: bool, output: Value) -> Self {
        Self {
            chain,
            output: Some(output),
        }
    }
}

pub(super) async fn parse(
    renderer: &mut Renderer,
    token: &LogicToken,
    context: &Context,
    chain: bool,
) -> TwigResult<LogicResult> {
    let body = token.output.as_slice();
    match &token.kind {
        LogicKind::If { condition } => {
            if evaluate(renderer, condition, context).await?.is_truthy() {
                let output = renderer.parse(body, context).await?;
                Ok(LogicResult::emit(false, output))
            } else {
                Ok(LogicResult::silent(true))
            }
        }
        LogicKind::ElseIf { condition } => {
            if chain && evaluate(renderer, condition, context).await?.is_truthy() {
                let output = renderer.parse(body, context).await?;
                Ok(LogicResult::emit(false, output))
            } else {
                Ok(LogicResult::silent(chain))
            }
        }
        LogicKind::Else => {
            if chain {
                let output = renderer.parse(body, context).await?;
                Ok(LogicResult::emit(chain, output))
            } else {
                Ok(LogicResult::silent(chain))
            }
        }
        LogicKind::For {
            key_var,
            value_var,
            expression,
            conditional,
        } => {
            let target = evaluate(renderer, expression, context).await?;
            for_loop(
                renderer,
                body,
                context,
                &target,
                (key_var.as_deref(), value_var.as_str()),
                conditional.as_deref(),
            )
            .await
        }
        LogicKind::Set { key, expression } => {
            let value = evaluate(renderer, expression, context).await?;
            context.set(key.as_str(), value);
            Ok(LogicResult::silent(chain))
        }
        LogicKind::SetCapture { key } => {
            let value = renderer.parse(body, context).await?;
            renderer.state.context.set(key.as_str(), value.clone());
            context.set(key.as_str(), value);
            Ok(LogicResult::silent(chain))
        }
        LogicKind::Filter { filters } => {
            let rendered = renderer.parse(body, context).await?;
            let output = evaluate_with(renderer, filters, context, vec![rendered]).await?;
            Ok(LogicResult::emit(chain, output))
        }
        LogicKind::Block { name } => {
            let output = block(renderer, name, BlockBody::Tokens(body), context).await?;
            Ok(LogicResult::emit(chain, output))
        }
        LogicKind::ShortBlock { name, expression } => {
            let output = block(renderer, name, BlockBody::Expression(expression), context).await?;
            Ok(LogicResult::emit(chain, output))
        }
        LogicKind::Extends { expression } => {
            let parent = evaluate(renderer, expression, context).await?;
            renderer.state.extend = Some(parent);
            Ok(LogicResult::silent(chain))
        }
        LogicKind::Use { expression } => {
            let file = evaluate(renderer, expression, context).await?;
            let template = renderer.import_file(file).await?;
            let scope = renderer.state.context.clone();
            let imported = renderer.render_sub(template, scope, Object::new()).await?;
            for (name, content) in imported.blocks {
                if !renderer.state.blocks.contains_key(&name) {
                    renderer.state.imported_blocks.push(name.clone());
                    renderer.state.blocks.insert(name, content);
                }
            }
            Ok(LogicResult::silent(chain))
        }
        LogicKind::Include {
            expression,
            with,
            only,
            ignore_missing,
        } => {
            let scope = scoped_context(renderer, context, with.as_deref(), *only).await?;
            let file = evaluate(renderer, expression, context).await?;
            let template = match renderer.import_file(file).await {
                Ok(template) => template,
                Err(err) if *ignore_missing => {
                    log::debug!("ignoring missing include: {}", err);
                    return Ok(LogicResult::emit(chain, Value::from("")));
                }
                Err(err) => return Err(err),
            };
            let included = renderer.render_sub(template, scope, Object::new()).await?;
            Ok(LogicResult::emit(chain, included.text))
        }
        LogicKind::Embed {
            expression,
            with,
            only,
            ignore_missing,
        } => {
            let scope = scoped_context(renderer, context, with.as_deref(), *only).await?;
            let file = evaluate(renderer, expression, context).await?;

            let saved = std::mem::take(&mut renderer.state.blocks);
            let result = embed(renderer, body, &scope, file).await;
            renderer.state.blocks = saved;

            match result {
                Ok(output) => Ok(LogicResult::emit(chain, output)),
                Err(err) if *ignore_missing && is_missing(&err) => {
                    Ok(LogicResult::emit(chain, Value::from("")))
                }
                Err(err) => Err(err),
            }
        }
        LogicKind::With { with, only } => {
            let scope = scoped_context(renderer, context, with.as_deref(), *only).await?;
            let output = renderer.parse(body, &scope).await?;
            Ok(LogicResult::emit(chain, output))
        }
        LogicKind::Spaceless => {
            let rendered = renderer.parse(body, context).await?;
            Ok(LogicResult::emit(chain, Renderer::spaceless(&rendered)))
        }
        LogicKind::Verbatim => {
            let output = renderer.parse(body, context).await?;
            Ok(LogicResult::emit(chain, output))
        }
        LogicKind::Macro { name, parameters } => {
            let definition = Macro {
                name: name.clone(),
                parameters: parameters.clone(),
                body: token.output.clone(),
                template: Rc::clone(&renderer.template),
                options: Rc::clone(&renderer.options),
                definition_context: context.clone(),
                macros: Rc::clone(&renderer.state.macros),
            };
            renderer
                .state
                .macros
                .borrow_mut()
                .insert(name.clone(), Value::Macro(Rc::new(definition)));
            Ok(LogicResult::silent(chain))
        }
        LogicKind::Import {
            source,
            expression,
            alias,
        } => {
            let macros = macros_of(renderer, source, expression, context).await?;
            context.set(alias.as_str(), Value::object(macros));
            Ok(LogicResult::silent(chain))
        }
        LogicKind::From {
            source,
            expression,
            names,
        } => {
            let macros = macros_of(renderer, source, expression, context).await?;
            for (name, alias) in names {
                if let Some(definition) = macros.get(name) {
                    context.set(alias.as_str(), definition.clone());
                }
            }
            Ok(LogicResult::silent(chain))
        }
        LogicKind::End(_) => Ok(LogicResult::silent(chain)),
        LogicKind::Custom { name, arguments } => {
            custom(renderer, name, arguments, body, context, chain).await
        }
    }
}

async fn for_loop(
    renderer: &mut Renderer,
    body: &[Token],
    context: &Context,
    target: &Value,
    (key_var, value_var): (Option<&str>, &str),
    conditional: Option<&[ExprToken]>,
) -> TwigResult<LogicResult> {
    let entries = match target {
        Value::Array(_) | Value::Object(_) => target.entries(),
        Value::Undefined
        | Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Markup(_)
        | Value::Date(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::Template(_)
        | Value::Promise(_) => Vec::new(),
    };
    let length = entries.len();
    let parent = context.snapshot();
    let mut outputs = Vec::new();
    let mut index: usize = 0;

    for (key, value) in entries {
        let inner = context.child();
        inner.set(value_var, value);
        if let Some(key_var) = key_var {
            inner.set(key_var, key);
        }
        inner.set("loop", loop_object(index, length, conditional.is_some(), &parent));

        let passes = match conditional {
            Some(conditional) => evaluate(renderer, conditional, &inner).await?.is_js_truthy(),
            None => true,
        };
        if passes {
            outputs.push(renderer.parse(body, &inner).await?);
            index = index.saturating_add(1);
        }

        inner.remove("loop");
        inner.remove(value_var);
        if let Some(key_var) = key_var {
            inner.remove(key_var);
        }
        context.merge_existing(&inner);
    }

    let chain = outputs.is_empty();
    Ok(LogicResult::emit(chain, renderer.output(outputs)))
}

fn loop_object(index: usize, length: usize, conditional: bool, parent: &Value) -> Value {
    let counted = |value: usize| {
        if conditional {
            Value::Undefined
        } else {
            Value::from(value)
        }
    };
    let mut object = Object::new();
    object.insert("index".to_string(), Value::from(index.saturating_add(1)));
    object.insert("index0".to_string(), Value::from(index));
    object.insert(
        "revindex".to_string(),
        counted(length.saturating_sub(index)),
    );
    object.insert(
        "revindex0".to_string(),
        counted(length.saturating_sub(index).saturating_sub(1)),
    );
    object.insert("first".to_string(), Value::Bool(index == 0));
    object.insert(
        "last".to_string(),
        if conditional {
            Value::Undefined
        } else {
            Value::Bool(index.saturating_add(1) == length)
        },
    );
    object.insert("length".to_string(), counted(length));
    object.insert("parent".to_string(), parent.clone());
    Value::object(object)
}

/// The scope for `include`, `embed` and `with`.
async fn scoped_context(
    renderer: &mut Renderer,
    context: &Context,
    with: Option<&[ExprToken]>,
    only: bool,
) -> TwigResult<Context> {
    let scope = if only { Context::new() } else { context.child() };
    if let Some(with) = with {
        let values = evaluate(renderer, with, context).await?;
        scope.extend_with(&values);
    }
    Ok(scope)
}

enum BlockBody<'a> {
    Tokens(&'a [Token]),
    Expression(&'a [ExprToken]),
}

async fn block(
    renderer: &mut Renderer,
    name: &str,
    body: BlockBody<'_>,
    context: &Context,
) -> TwigResult<Value> {
    let imported = renderer.state.imported_blocks.iter().any(|b| b == name);
    let existing = renderer.state.blocks.get(name).cloned();
    let has_parent = existing
        .as_ref()
        .and_then(Value::as_str)
        .is_some_and(|content| content.contains(PARENT_PLACEHOLDER));
    let in_loop = renderer.state.parse_stack.contains(&TagType::For);

    if existing.is_none() || imported || has_parent || in_loop {
        let (output, tokens) = match body {
            BlockBody::Tokens(tokens) => (renderer.parse(tokens, context).await?, tokens.to_vec()),
            BlockBody::Expression(expression) => (
                evaluate(renderer, expression, context).await?,
                vec![Token::Output(expression.to_vec())],
            ),
        };
        if imported {
            renderer.state.imported_blocks.retain(|b| b != name);
        }
        let content = match existing.as_ref().and_then(Value::as_str) {
            Some(child) if has_parent => {
                Value::markup(child.replace(PARENT_PLACEHOLDER, &output.to_string()))
            }
            Some(_) | None => output,
        };
        renderer.state.blocks.insert(name.to_string(), content);
        renderer
            .state
            .original_block_tokens
            .insert(name.to_string(), tokens);
    }

    Ok(renderer.state.blocks.get(name).cloned().unwrap_or_default())
}

async fn embed(
    renderer: &mut Renderer,
    body: &[Token],
    scope: &Context,
    file: Value,
) -> TwigResult<Value> {
    renderer.parse(body, scope).await?;
    let blocks: Object = renderer
        .state
        .blocks
        .iter()
        .map(|(name, content)| (name.clone(), content.clone()))
        .collect();
    let template = renderer.import_file(file).await?;
    let embedded = renderer.render_sub(template, scope.clone(), blocks).await?;
    Ok(embedded.text)
}

fn is_missing(err: &TwigError) -> bool {
    matches!(
        err.root_cause(),
        TwigError::TemplateNotFound { .. } | TwigError::Loader(_)
    )
}

/// The macro table named by an `import` or `from` tag.
async fn macros_of(
    renderer: &mut Renderer,
    source: &str,
    expression: &[ExprToken],
    context: &Context,
) -> TwigResult<Object> {
    if source == "_self" {
        return Ok(renderer.state.macros.borrow().clone());
    }
    let file = evaluate(renderer, expression, context).await?;
    let template = renderer.import_file(file).await?;
    let imported = renderer
        .render_sub(template, Context::new(), Object::new())
        .await?;
    Ok(imported.macros)
}

async fn custom(
    renderer: &mut Renderer,
    name: &str,
    arguments: &[Vec<ExprToken>],
    body: &[Token],
    context: &Context,
    chain: bool,
) -> TwigResult<LogicResult> {
    let tag = renderer
        .engine
        .tag(name)
        .ok_or_else(|| TwigError::syntax(format!("Unknown logic tag {}", name)))?;
    let mut values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        values.push(evaluate(renderer, argument, context).await?);
    }
    let outcome = tag.parse(TagCall {
        arguments: values,
        context,
        chain,
    })?;
    let output = match outcome.output {
        TagOutput::Value(value) => Some(renderer.mode.settle(value).await?),
        TagOutput::Body => Some(renderer.parse(body, context).await?),
        TagOutput::Nothing => None,
    };
    Ok(LogicResult {
        chain: outcome.chain,
        output,
    })
}
