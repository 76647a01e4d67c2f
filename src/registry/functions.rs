//! Built-in functions.
//!
//! `block` is not listed here: it needs the renderer's block state and is
//! resolved by [`crate::render`] before the registry is consulted.

use rand::Rng;

use crate::error::{TwigError, TwigResult};
use crate::interface::{LoadRequest, TemplateSource};
use crate::promise::Promise;
use crate::registry::{Call, date, php};
use crate::template::TemplateParams;
use crate::value::{Markup, Value, format_number};

pub(super) type BuiltinFunction = fn(&Call<'_>, &[Value]) -> TwigResult<Value>;

pub(super) const FUNCTIONS: [(&str, BuiltinFunction); 11] = [
    ("range", range_function),
    ("cycle", cycle),
    ("dump", dump),
    ("date", date_function),
    ("parent", parent),
    ("attribute", attribute),
    ("max", max),
    ("min", min),
    ("template_from_string", template_from_string),
    ("random", random),
    ("source", source),
];

/// Replaced by the parent block's content once the parent renders.
pub(crate) const PARENT_PLACEHOLDER: &str = "{{|PARENT|}}";

const TEMPLATE_NOT_FOUND: &str = "Template \"{name}\" is not defined.";

const LIMIT_INT31: f64 = 2_147_483_648.0;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Numbers or single characters from `low` to `high`, inclusive, in either
/// direction. Used by `range()` and the `..` operator.
pub(crate) fn range(low: &Value, high: &Value, step: Option<&Value>) -> TwigResult<Value> {
    let walker = step
        .map(Value::to_number)
        .filter(|step| *step != 0.0 && !step.is_nan())
        .map_or(1.0, f64::abs);

    let char_code = |value: &Value| {
        value
            .to_string()
            .chars()
            .next()
            .map_or(f64::NAN, |c| f64::from(u32::from(c)))
    };
    let (low_number, high_number) = (low.to_number(), high.to_number());
    let (start, end, chars) = match (low_number.is_nan(), high_number.is_nan()) {
        (false, false) => (low_number.trunc(), high_number.trunc(), false),
        (true, true) => (char_code(low), char_code(high), true),
        (low_nan, high_nan) => (
            if low_nan { 0.0 } else { low_number },
            if high_nan { 0.0 } else { high_number },
            false,
        ),
    };

    let mut items = Vec::new();
    if start.is_nan() || end.is_nan() {
        return Ok(Value::array(items));
    }
    if start.is_infinite() || end.is_infinite() {
        return Err(TwigError::runtime("range bounds must be finite"));
    }

    let ascending = start <= end;
    let mut current = start;
    while (ascending && current <= end) || (!ascending && current >= end) {
        let item = if chars {
            char::from_u32(current as u32).map_or(Value::Undefined, |c| Value::from(c.to_string()))
        } else {
            Value::Number(current)
        };
        items.push(item);
        if current == end {
            break;
        }
        let next = if ascending {
            current + walker
        } else {
            current - walker
        };
        if next == current {
            return Err(TwigError::runtime("range step is too small for its bounds"));
        }
        current = next;
    }
    Ok(Value::array(items))
}

fn range_function(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    range(&arg(args, 0), &arg(args, 1), args.get(2))
}

fn cycle(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let items = arg(args, 0);
    let length = items.length();
    if length == 0 {
        return Ok(Value::Undefined);
    }
    let position = arg(args, 1).to_number() % length as f64;
    if position.is_nan() {
        return Ok(Value::Undefined);
    }
    Ok(items.get_key(&Value::Number(position)).unwrap_or_default())
}

struct Dumper {
    out: String,
    depth: usize,
}

impl Dumper {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn dump(&mut self, value: &Value) {
        match value {
            Value::Null => self.line("NULL"),
            Value::Undefined => self.line("undefined"),
            Value::Array(_)
            | Value::Object(_)
            | Value::Date(_)
            | Value::Template(_)
            | Value::Promise(_) => {
                let entries = value.entries();
                self.indent();
                self.line(&format!("object({}) {{", entries.len()));
                self.depth = self.depth.saturating_add(1);
                for (key, item) in &entries {
                    self.indent();
                    self.line(&format!("[{}]=> ", key));
                    self.display(item);
                }
                self.depth = self.depth.saturating_sub(1);
                self.indent();
                self.line("}");
            }
            Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Markup(_)
            | Value::Function(_)
            | Value::Macro(_) => self.display(value),
        }
    }

    fn display(&mut self, value: &Value) {
        self.indent();
        match value {
            Value::Null
            | Value::Array(_)
            | Value::Object(_)
            | Value::Date(_)
            | Value::Template(_)
            | Value::Promise(_) => self.dump(value),
            Value::Function(_) | Value::Macro(_) => self.line("function()"),
            Value::String(_) | Value::Markup(_) => {
                let text = value.as_str().unwrap_or_default();
                self.line(&format!(
                    "string({}) \"{}\"",
                    text.encode_utf16().count(),
                    text
                ));
            }
            Value::Number(n) => self.line(&format!("number({})", format_number(*n))),
            Value::Bool(b) => self.line(&format!("bool({})", b)),
            Value::Undefined => {}
        }
    }
}

/// PHP `var_dump` style output. Without arguments the whole scope is dumped.
fn dump(call: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let mut dumper = Dumper {
        out: String::new(),
        depth: 0,
    };
    if args.is_empty() {
        dumper.dump(&call.context.snapshot());
    }
    for value in args {
        dumper.dump(value);
    }
    Ok(Value::String(dumper.out))
}

fn date_function(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    date::to_date(&arg(args, 0)).map(Value::Date)
}

fn parent(_: &Call<'_>, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Markup(Markup::safe(PARENT_PLACEHOLDER)))
}

fn attribute(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let object = arg(args, 0);
    let method = arg(args, 1);
    if let Value::Object(map) = &object {
        if let Some(member) = map.get(&method.to_string()) {
            return match member {
                Value::Function(function) => {
                    let params = args
                        .get(2)
                        .and_then(Value::as_array)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default();
                    function.call(&params)
                }
                other => Ok(other.clone()),
            };
        }
    }
    Ok(object
        .get_key(&method)
        .filter(Value::is_js_truthy)
        .unwrap_or_default())
}

/// Shared by `max` and `min`; `wanted` is the comparison result that
/// replaces the current pick.
fn extreme(name: &str, args: &[Value], wanted: i8) -> TwigResult<Value> {
    let candidates = match args {
        [] => {
            return Err(TwigError::runtime(format!(
                "At least one value should be passed to {}()",
                name
            )));
        }
        [single] => match single {
            Value::Array(_) | Value::Object(_) | Value::Null => single.values(),
            Value::Undefined
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Markup(_)
            | Value::Date(_)
            | Value::Function(_)
            | Value::Macro(_)
            | Value::Template(_)
            | Value::Promise(_) => {
                return Err(TwigError::runtime(format!(
                    "Wrong parameter count for {}()",
                    name
                )));
            }
        },
        many => many.to_vec(),
    };

    let mut candidates = candidates.into_iter();
    let Some(mut pick) = candidates.next() else {
        return Err(TwigError::runtime(format!(
            "Array must contain at least one element for {}()",
            name
        )));
    };
    for candidate in candidates {
        if php::compare(&pick, &candidate) == wanted {
            pick = candidate;
        }
    }
    Ok(pick)
}

fn max(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    extreme("max", args, 1)
}

fn min(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    extreme("min", args, -1)
}

fn template_from_string(call: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let source = match args.first() {
        None | Some(Value::Undefined) => String::new(),
        Some(value) => value.to_string(),
    };
    let params = TemplateParams::new().options((**call.options).clone());
    call.engine
        .create_template(source, params)
        .map(Value::Template)
}

fn random_up_to(n: f64) -> f64 {
    let (low, high) = (n.min(0.0), n.max(0.0));
    let random = (rand::rng().random::<f64>() * LIMIT_INT31).floor();
    low + ((high - low + 1.0) * random / LIMIT_INT31).floor()
}

fn random(_: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let value = arg(args, 0);
    let pick = |length: usize| Value::Number(random_up_to(length as f64 - 1.0));
    let result = match &value {
        Value::Number(n) => Value::Number(random_up_to(*n)),
        Value::String(_) | Value::Markup(_) => {
            let chars: Vec<char> = value.as_str().unwrap_or_default().chars().collect();
            let index = random_up_to(chars.len() as f64 - 1.0) as usize;
            chars
                .get(index)
                .map_or_else(|| Value::from(""), |c| Value::from(c.to_string()))
        }
        Value::Array(items) => value.get_key(&pick(items.len())).unwrap_or_default(),
        Value::Object(map) => {
            let index = random_up_to(map.len() as f64 - 1.0) as usize;
            map.get_index(index)
                .map(|(_, item)| item.clone())
                .unwrap_or_default()
        }
        Value::Undefined
        | Value::Null
        | Value::Bool(_)
        | Value::Date(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::Template(_)
        | Value::Promise(_) => Value::Number(random_up_to(LIMIT_INT31 - 1.0)),
    };
    Ok(result)
}

/// Reads a template's source through the `fs` loader without rendering it.
fn source(call: &Call<'_>, args: &[Value]) -> TwigResult<Value> {
    let name = arg(args, 0).to_string();
    let ignore_missing = arg(args, 1).is_truthy();
    let Some(loader) = call.engine.loader("fs") else {
        return Ok(Value::from(missing_source(&name, ignore_missing)));
    };

    let promise = Promise::from_future(async move {
        let request = LoadRequest {
            location: &name,
            id: &name,
            base: None,
        };
        let text = match loader.load(request).await {
            Ok(Some(TemplateSource::Text(text))) => text,
            Ok(Some(TemplateSource::Compiled(_))) => String::new(),
            Ok(None) => missing_source(&name, ignore_missing),
            Err(err) => {
                log::debug!("problem loading template source {}: {}", name, err);
                missing_source(&name, ignore_missing)
            }
        };
        Ok(Value::from(text))
    });
    Ok(Value::Promise(promise))
}

fn missing_source(name: &str, ignore_missing: bool) -> String {
    if ignore_missing {
        String::new()
    } else {
        TEMPLATE_NOT_FOUND.replace("{name}", name)
    }
}
