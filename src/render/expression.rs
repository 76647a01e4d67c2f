//! Evaluating compiled expressions over a value stack.

use std::iter::Peekable;
use std::slice::Iter;

use futures_util::future::{FutureExt, LocalBoxFuture};

use crate::ast::{ExprToken, ObjectKey};
use crate::error::{TwigError, TwigResult};
use crate::interface::Context;
use crate::registry::Call;
use crate::render::Renderer;
use crate::value::{Object, Value};

enum Slot {
    Value(Value),
    ArrayStart,
    ObjectStart,
    Key(String),
}

/// Evaluates `tokens` and returns the value left on top of the stack.
pub(super) fn evaluate<'a>(
    renderer: &'a mut Renderer,
    tokens: &'a [ExprToken],
    context: &'a Context,
) -> LocalBoxFuture<'a, TwigResult<Value>> {
    evaluate_with(renderer, tokens, context, Vec::new())
}

/// Like [`evaluate`], with `initial` already on the stack.
pub(super) fn evaluate_with<'a>(
    renderer: &'a mut Renderer,
    tokens: &'a [ExprToken],
    context: &'a Context,
    initial: Vec<Value>,
) -> LocalBoxFuture<'a, TwigResult<Value>> {
    async move {
        let stack = run(renderer, tokens, context, initial).await?;
        Ok(stack
            .into_iter()
            .rev()
            .find_map(|slot| match slot {
                Slot::Value(value) => Some(value),
                Slot::ArrayStart | Slot::ObjectStart | Slot::Key(_) => None,
            })
            .unwrap_or_default())
    }
    .boxed_local()
}

/// Evaluates a parameter list, keeping every value it produces.
fn arguments<'a>(
    renderer: &'a mut Renderer,
    params: Option<&'a [ExprToken]>,
    context: &'a Context,
) -> LocalBoxFuture<'a, TwigResult<Vec<Value>>> {
    async move {
        let Some(params) = params else {
            return Ok(Vec::new());
        };
        let stack = run(renderer, params, context, Vec::new()).await?;
        Ok(stack
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Value(value) => Some(value),
                Slot::ArrayStart | Slot::ObjectStart | Slot::Key(_) => None,
            })
            .collect())
    }
    .boxed_local()
}

fn pop(stack: &mut Vec<Slot>) -> Value {
    match stack.pop() {
        Some(Slot::Value(value)) => value,
        Some(marker) => {
            stack.push(marker);
            Value::Undefined
        }
        None => Value::Undefined,
    }
}

fn run<'a>(
    renderer: &'a mut Renderer,
    tokens: &'a [ExprToken],
    context: &'a Context,
    initial: Vec<Value>,
) -> LocalBoxFuture<'a, TwigResult<Vec<Slot>>> {
    async move {
        let mut stack: Vec<Slot> = initial.into_iter().map(Slot::Value).collect();
        let mut tokens = tokens.iter().peekable();

        while let Some(token) = tokens.next() {
            match token {
                ExprToken::Number(n) => stack.push(Slot::Value(Value::Number(*n))),
                ExprToken::String(text) => stack.push(Slot::Value(Value::from(text.as_str()))),
                ExprToken::Bool(b) => stack.push(Slot::Value(Value::Bool(*b))),
                ExprToken::Null => stack.push(Slot::Value(Value::Null)),
                ExprToken::Context => stack.push(Slot::Value(context.snapshot())),
                ExprToken::Variable(name) => {
                    let value = context.get(name).unwrap_or_default();
                    let value = resolve(renderer, value, None, &mut tokens, context).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::KeyPeriod(key) => {
                    let object = pop(&mut stack);
                    let value = if object.is_nullish() {
                        if renderer.options.strict_variables {
                            return Err(TwigError::NullKeyAccess { key: key.clone() });
                        }
                        Value::Undefined
                    } else {
                        renderer.engine.accessor().access(&object, key)
                    };
                    let value = resolve(renderer, value, None, &mut tokens, context).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::KeyBrackets { key, params } => {
                    let args = arguments(renderer, params.as_deref(), context).await?;
                    let key = evaluate(renderer, key, context).await?;
                    let object = pop(&mut stack);
                    let value = match &object {
                        Value::Undefined | Value::Null => {
                            if renderer.options.strict_variables {
                                return Err(TwigError::NullKeyAccess {
                                    key: key.to_string(),
                                });
                            }
                            Value::Null
                        }
                        Value::Array(_) | Value::Object(_) => {
                            object.get_key(&key).unwrap_or(Value::Null)
                        }
                        Value::Bool(_)
                        | Value::Number(_)
                        | Value::String(_)
                        | Value::Markup(_)
                        | Value::Date(_)
                        | Value::Function(_)
                        | Value::Macro(_)
                        | Value::Template(_)
                        | Value::Promise(_) => Value::Null,
                    };
                    let params = params.is_some().then_some(args);
                    let value = resolve(renderer, value, params, &mut tokens, context).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::Filter { name, params } => {
                    let input = pop(&mut stack);
                    let args = arguments(renderer, params.as_deref(), context).await?;
                    let value = apply_filter(renderer, name, &input, &args).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::Function { name, params } => {
                    let args = arguments(renderer, params.as_deref(), context).await?;
                    let value = call_function(renderer, name, args, context).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::Test {
                    name,
                    negated,
                    params,
                } => {
                    let input = pop(&mut stack);
                    let args = arguments(renderer, params.as_deref(), context).await?;
                    let test = renderer
                        .engine
                        .test(name)
                        .ok_or_else(|| TwigError::UnknownTest { name: name.clone() })?;
                    let result = renderer.mode.settle(test(&input, &args)?).await?;
                    stack.push(Slot::Value(Value::Bool(result.is_js_truthy() != *negated)));
                }
                ExprToken::Operator(operator) => {
                    let mut operands: Vec<Value> =
                        (0..operator.arity()).map(|_| pop(&mut stack)).collect();
                    operands.reverse();
                    stack.push(Slot::Value(operator.apply(operands)?));
                }
                ExprToken::ObjectKey(ObjectKey::Name(name)) => stack.push(Slot::Key(name.clone())),
                ExprToken::ObjectKey(ObjectKey::Expression(inner)) => {
                    let key = evaluate(renderer, inner, context).await?;
                    stack.push(Slot::Key(key.to_string()));
                }
                ExprToken::ArrayStart => stack.push(Slot::ArrayStart),
                ExprToken::ObjectStart => stack.push(Slot::ObjectStart),
                ExprToken::ArrayEnd => {
                    let mut items = Vec::new();
                    while let Some(slot) = stack.pop() {
                        match slot {
                            Slot::ArrayStart => break,
                            Slot::Value(value) => items.push(value),
                            Slot::ObjectStart | Slot::Key(_) => {}
                        }
                    }
                    items.reverse();
                    stack.push(Slot::Value(Value::array(items)));
                }
                ExprToken::ObjectEnd => {
                    let mut entries = Vec::new();
                    let mut pending: Option<Value> = None;
                    while let Some(slot) = stack.pop() {
                        match slot {
                            Slot::ObjectStart => break,
                            Slot::Value(value) => pending = Some(value),
                            Slot::Key(key) => entries.push((key, pending.take().unwrap_or_default())),
                            Slot::ArrayStart => {}
                        }
                    }
                    let object: Object = entries.into_iter().rev().collect();
                    stack.push(Slot::Value(Value::object(object)));
                }
                ExprToken::ParameterStart | ExprToken::SubexpressionStart => {}
                ExprToken::ParameterEnd(inner) | ExprToken::SubexpressionEnd(inner) => {
                    let value = evaluate(renderer, inner, context).await?;
                    stack.push(Slot::Value(value));
                }
                ExprToken::Slice { start, end } => {
                    let input = pop(&mut stack);
                    let mut args = vec![start.map_or(Value::Undefined, Value::from)];
                    if let Some(end) = end {
                        args.push(Value::from(*end));
                    }
                    let value = apply_filter(renderer, "slice", &input, &args).await?;
                    stack.push(Slot::Value(value));
                }
            }
        }
        Ok(stack)
    }
    .boxed_local()
}

/// Calls `value` when it is callable, taking its arguments either from
/// `params` or from a parenthesised group directly after it. Anything else
/// is settled.
async fn resolve(
    renderer: &mut Renderer,
    value: Value,
    params: Option<Vec<Value>>,
    tokens: &mut Peekable<Iter<'_, ExprToken>>,
    context: &Context,
) -> TwigResult<Value> {
    if !value.is_callable() {
        return renderer.mode.settle(value).await;
    }
    let args = match params {
        Some(args) => args,
        None => match tokens.peek().copied() {
            Some(ExprToken::ParameterEnd(inner)) => {
                tokens.next();
                arguments(renderer, Some(inner.as_slice()), context).await?
            }
            Some(_) | None => Vec::new(),
        },
    };
    invoke(renderer, value, args).await
}

async fn invoke(renderer: &mut Renderer, value: Value, args: Vec<Value>) -> TwigResult<Value> {
    match value {
        Value::Function(function) => {
            let result = function.call(&args)?;
            renderer.mode.settle(result).await
        }
        Value::Macro(definition) => renderer.call_macro(definition, args).await,
        other => Ok(other),
    }
}

async fn apply_filter(
    renderer: &Renderer,
    name: &str,
    input: &Value,
    args: &[Value],
) -> TwigResult<Value> {
    let filter = renderer
        .engine
        .filter(name)
        .ok_or_else(|| TwigError::UnknownFilter {
            name: name.to_string(),
        })?;
    renderer.mode.settle(filter(input, args)?).await
}

async fn call_function(
    renderer: &mut Renderer,
    name: &str,
    args: Vec<Value>,
    context: &Context,
) -> TwigResult<Value> {
    if name == "block" {
        let block = args.first().map(ToString::to_string).unwrap_or_default();
        return renderer.render_block(&block).await;
    }
    if let Some(function) = renderer.engine.function(name) {
        let call = Call {
            context,
            engine: &renderer.engine,
            template: &renderer.template,
            options: &renderer.options,
        };
        let result = function(&call, &args)?;
        return renderer.mode.settle(result).await;
    }
    match context.get(name) {
        Some(value) if value.is_callable() => invoke(renderer, value, args).await,
        Some(_) | None => Err(TwigError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::interface::Context;
    use crate::promise::Promise;
    use crate::template::{TemplateOptions, TemplateParams};
    use crate::value::{Function, Value};
    use crate::{TwigEngine, TwigError};

    fn render_with(source: &str, context: &Context, options: TemplateOptions) -> String {
        let engine = TwigEngine::new();
        engine.set_default_options(options.rethrow(true));
        let template = engine.create_template(source, TemplateParams::new()).unwrap();
        engine.render_template(&template, Some(context)).unwrap()
    }

    fn render(source: &str) -> String {
        render_with(source, &Context::new(), TemplateOptions::new())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_precedence() {
        assert_eq!(render("{{ 1 + 2 * 3 }}"), "7", "multiplication first");
        assert_eq!(render("{{ (1 + 2) * 3 }}"), "9", "grouping");
        assert_eq!(render("{{ 0 ?: 2 }}"), "2", "elvis");
        assert_eq!(render("{{ true ? 'y' : 'n' }}"), "y", "ternary");
        assert_eq!(render("{{ null ?? 'd' }}"), "d", "null coalescing");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_containment() {
        assert_eq!(render("{{ 'ell' in 'hello' }}"), "true", "substring");
        assert_eq!(render("{{ 5 in [1,2,3] }}"), "false", "array membership");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals_and_keys() {
        assert_eq!(render("{{ [1, 2, 3]|join('-') }}"), "1-2-3", "array literal");
        assert_eq!(render("{{ {a: 1, 'b': 2}.b }}"), "2", "object literal");
        assert_eq!(render("{{ {a: 1, a: 2}.a }}"), "2", "last duplicate key wins");
        assert_eq!(render("{{ [4, 5][1] }}"), "5", "bracket index");
        assert_eq!(render("{{ 'abcdef'[1:3] }}"), "bcd", "slice takes a length");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filters_and_tests() {
        assert_eq!(render("{{ 'Hello'|upper|lower }}"), "hello", "filter chain");
        assert_eq!(render("{{ 3 is odd }}"), "true", "test");
        assert_eq!(render("{{ 3 is not odd }}"), "false", "negated test");
        assert_eq!(render("{{ x is defined }}"), "false", "undefined variable");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_context_callables() {
        let mut context = Context::new();
        context.insert(
            "double",
            Function::new(|args: &[Value]| {
                Ok(Value::Number(args.first().map_or(0.0, Value::to_number) * 2.0))
            }),
        );
        let mut user = crate::value::Object::new();
        user.insert(
            "getName".to_string(),
            Value::from(Function::new(|_: &[Value]| Ok(Value::from("Ann")))),
        );
        context.insert("user", Value::object(user));

        let options = TemplateOptions::new();
        assert_eq!(
            render_with("{{ double(4) }}", &context, options.clone()),
            "8",
            "context function"
        );
        assert_eq!(
            render_with("{{ user.name }}", &context, options),
            "Ann",
            "getter is called"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strict_variables() {
        let engine = TwigEngine::new();
        engine.set_default_options(TemplateOptions::new().strict_variables(true).rethrow(true));
        let template = engine
            .create_template("{{ missing.key }}", TemplateParams::new())
            .unwrap();
        assert_eq!(
            engine.render_template(&template, None).unwrap_err().root_cause(),
            &TwigError::NullKeyAccess {
                key: "key".to_string()
            },
            "null key access is an error"
        );
        assert_eq!(render("{{ missing.key }}"), "", "lenient by default");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_pending_promise_in_sync_mode() {
        let mut context = Context::new();
        context.insert(
            "later",
            Function::new(|_: &[Value]| Ok(Value::Promise(Promise::pending().0))),
        );
        let engine = TwigEngine::new();
        let template = engine
            .create_template("{{ later() }}", TemplateParams::new())
            .unwrap();
        assert_eq!(
            engine.render_template(&template, Some(&context)).unwrap_err(),
            TwigError::AsyncInSyncMode,
            "sync renders cannot wait"
        );
    }
}
