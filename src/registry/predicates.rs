//! Built-in tests used by `is` expressions.

use crate::error::TwigResult;
use crate::value::Value;

pub(super) type BuiltinTest = fn(&Value, &[Value]) -> TwigResult<Value>;

pub(super) const TESTS: [(&str, BuiltinTest); 10] = [
    ("empty", empty),
    ("odd", odd),
    ("even", even),
    ("divisibleby", divisible_by),
    ("defined", defined),
    ("none", none),
    ("null", none),
    ("same as", same_as),
    ("sameas", deprecated_same_as),
    ("iterable", iterable),
];

fn empty(value: &Value, _: &[Value]) -> TwigResult<Value> {
    let empty = match value {
        Value::Undefined | Value::Null => true,
        Value::Number(_) => false,
        Value::String(_) | Value::Markup(_) | Value::Array(_) | Value::Object(_) => {
            value.length() == 0
        }
        Value::Bool(_)
        | Value::Date(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::Template(_)
        | Value::Promise(_) => true,
    };
    Ok(Value::Bool(empty))
}

fn odd(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Bool(value.to_number() % 2.0 == 1.0))
}

fn even(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Bool(value.to_number() % 2.0 == 0.0))
}

fn divisible_by(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let divisor = args.first().map_or(f64::NAN, Value::to_number);
    Ok(Value::Bool(value.to_number() % divisor == 0.0))
}

fn defined(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Bool(!value.is_undefined()))
}

fn none(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Bool(matches!(value, Value::Null)))
}

fn same_as(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let other = args.first().cloned().unwrap_or_default();
    Ok(Value::Bool(value.strict_equals(&other)))
}

fn deprecated_same_as(value: &Value, args: &[Value]) -> TwigResult<Value> {
    log::warn!("`sameas` is deprecated use `same as`");
    same_as(value, args)
}

fn iterable(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::Bool(matches!(value, Value::Array(_) | Value::Object(_))))
}
