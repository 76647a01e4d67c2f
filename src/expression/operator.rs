use std::cmp::Ordering;

use regex::RegexBuilder;

use crate::ast::Operator;
use crate::error::{TwigError, TwigResult};
use crate::registry::functions::range;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Associativity {
    LeftToRight,
    RightToLeft,
}

/// Precedence of the `:` that separates ternary branches and object keys.
pub(crate) const COLON_PRECEDENCE: u8 = 16;

impl Operator {
    pub(crate) fn lookup(symbol: &str) -> TwigResult<Self> {
        let operator = match symbol {
            ".." => Self::Range,
            "?" => Self::Conditional { has_else: false },
            "?:" => Self::Elvis,
            "??" => Self::NullCoalesce,
            "or" => Self::Or,
            "and" => Self::And,
            "b-or" => Self::BitOr,
            "b-xor" => Self::BitXor,
            "b-and" => Self::BitAnd,
            "==" => Self::Equal,
            "!=" => Self::NotEqual,
            "<" => Self::Less,
            "<=" => Self::LessEqual,
            ">" => Self::Greater,
            ">=" => Self::GreaterEqual,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "matches" => Self::Matches,
            "starts with" => Self::StartsWith,
            "ends with" => Self::EndsWith,
            "~" => Self::Concat,
            "+" => Self::Add,
            "-" => Self::Subtract,
            "//" => Self::FloorDivide,
            "**" => Self::Power,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "%" => Self::Modulo,
            "not" => Self::Not,
            _ => {
                return Err(TwigError::syntax(format!(
                    "Failed to lookup operator: {} is an unknown operator.",
                    symbol
                )));
            }
        };
        Ok(operator)
    }

    /// Lower numbers bind tighter.
    pub(crate) const fn precedence(self) -> u8 {
        match self {
            Self::Range => 20,
            Self::Conditional { .. } | Self::Elvis => COLON_PRECEDENCE,
            Self::NullCoalesce => 15,
            Self::Or => 14,
            Self::And => 13,
            Self::BitOr => 12,
            Self::BitXor => 11,
            Self::BitAnd => 10,
            Self::Equal | Self::NotEqual => 9,
            Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::In
            | Self::NotIn
            | Self::Matches
            | Self::StartsWith
            | Self::EndsWith => 8,
            Self::Concat | Self::Add | Self::Subtract => 6,
            Self::FloorDivide | Self::Power | Self::Multiply | Self::Divide | Self::Modulo => 5,
            Self::Not => 3,
        }
    }

    pub(crate) const fn associativity(self) -> Associativity {
        match self {
            Self::Conditional { .. } | Self::Elvis | Self::NullCoalesce | Self::Not => {
                Associativity::RightToLeft
            }
            Self::Range
            | Self::Or
            | Self::And
            | Self::BitOr
            | Self::BitXor
            | Self::BitAnd
            | Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::In
            | Self::NotIn
            | Self::Matches
            | Self::StartsWith
            | Self::EndsWith
            | Self::Concat
            | Self::Add
            | Self::Subtract
            | Self::FloorDivide
            | Self::Power
            | Self::Multiply
            | Self::Divide
            | Self::Modulo => Associativity::LeftToRight,
        }
    }

    /// Number of operands popped from the value stack.
    pub(crate) const fn arity(self) -> usize {
        match self {
            Self::Not => 1,
            Self::Conditional { has_else: true } => 3,
            Self::Conditional { has_else: false }
            | Self::Range
            | Self::Elvis
            | Self::NullCoalesce
            | Self::Or
            | Self::And
            | Self::BitOr
            | Self::BitXor
            | Self::BitAnd
            | Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::In
            | Self::NotIn
            | Self::Matches
            | Self::StartsWith
            | Self::EndsWith
            | Self::Concat
            | Self::Add
            | Self::Subtract
            | Self::FloorDivide
            | Self::Power
            | Self::Multiply
            | Self::Divide
            | Self::Modulo => 2,
        }
    }

    /// Whether array operands are replaced by their length before applying.
    const fn counts_arrays(self) -> bool {
        !matches!(
            self,
            Self::In | Self::NotIn | Self::Conditional { .. } | Self::Elvis | Self::NullCoalesce
        )
    }

    /// Applies the operator to operands given in source order.
    pub(crate) fn apply(self, operands: Vec<Value>) -> TwigResult<Value> {
        let mut operands = operands.into_iter().map(|operand| match operand {
            Value::Array(items) if self.counts_arrays() => {
                Value::from(items.len())
            }
            other => other,
        });
        let a = operands.next().unwrap_or_default();
        let b = operands.next().unwrap_or_default();
        let c = operands.next().unwrap_or_default();

        let value = match self {
            Self::Not => Value::Bool(!a.is_truthy()),
            Self::Conditional { .. } => {
                if a.is_truthy() {
                    b
                } else {
                    c
                }
            }
            Self::Elvis => {
                if a.is_truthy() {
                    a
                } else {
                    b
                }
            }
            Self::NullCoalesce => {
                if a.is_nullish() {
                    b
                } else {
                    a
                }
            }
            Self::Range => range(&a, &b, None)?,
            Self::Or => Value::Bool(a.is_truthy() || b.is_truthy()),
            Self::And => Value::Bool(a.is_truthy() && b.is_truthy()),
            Self::BitOr => Value::from(to_int32(&a) | to_int32(&b)),
            Self::BitXor => Value::from(to_int32(&a) ^ to_int32(&b)),
            Self::BitAnd => Value::from(to_int32(&a) & to_int32(&b)),
            Self::Equal => Value::Bool(a.loose_equals(&b)),
            Self::NotEqual => Value::Bool(!a.loose_equals(&b)),
            Self::Less => Value::Bool(a.compare(&b) == Some(Ordering::Less)),
            Self::LessEqual => Value::Bool(matches!(
                a.compare(&b),
                Some(Ordering::Less | Ordering::Equal)
            )),
            Self::Greater => Value::Bool(a.compare(&b) == Some(Ordering::Greater)),
            Self::GreaterEqual => Value::Bool(matches!(
                a.compare(&b),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            Self::In => containment(&a, &b),
            Self::NotIn => Value::Bool(!containment(&a, &b).is_truthy()),
            Self::Matches => Value::Bool(matches(&a, &b)?),
            Self::StartsWith => Value::Bool(a.to_string().starts_with(&b.to_string())),
            Self::EndsWith => Value::Bool(a.to_string().ends_with(&b.to_string())),
            Self::Concat => {
                let mut text = if a.is_nullish() {
                    String::new()
                } else {
                    a.to_string()
                };
                if !b.is_nullish() {
                    text.push_str(&b.to_string());
                }
                Value::String(text)
            }
            Self::Add => Value::Number(a.parse_float() + b.parse_float()),
            Self::Subtract => Value::Number(a.parse_float() - b.parse_float()),
            Self::Multiply => Value::Number(a.parse_float() * b.parse_float()),
            Self::Divide => Value::Number(a.parse_float() / b.parse_float()),
            Self::FloorDivide => Value::Number((a.parse_float() / b.parse_float()).floor()),
            Self::Modulo => Value::Number(a.parse_float() % b.parse_float()),
            Self::Power => Value::Number(a.to_number().powf(b.to_number())),
        };
        Ok(value)
    }
}

/// JavaScript `ToInt32`.
fn to_int32(value: &Value) -> i32 {
    let n = value.to_number();
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    // within u32 range after rem_euclid
    let unsigned = wrapped as u32;
    unsigned as i32
}

/// `a in b`. A missing container yields `null` rather than `false`.
fn containment(needle: &Value, haystack: &Value) -> Value {
    let found = match haystack {
        Value::Undefined | Value::Null => return Value::Null,
        Value::String(_) | Value::Markup(_) => {
            needle.strict_equals(haystack)
                || (needle.as_str() != Some("")
                    && haystack
                        .as_str()
                        .is_some_and(|text| text.contains(&needle.to_string())))
        }
        Value::Array(items) => {
            needle.strict_equals(haystack)
                || (needle.as_str() != Some("")
                    && items.iter().any(|item| item.strict_equals(needle)))
        }
        Value::Object(map) => map.values().any(|item| item.strict_equals(needle)),
        Value::Bool(_)
        | Value::Number(_)
        | Value::Date(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::Template(_)
        | Value::Promise(_) => false,
    };
    Value::Bool(found)
}

/// `subject matches "/body/flags"`.
fn matches(subject: &Value, pattern: &Value) -> TwigResult<bool> {
    let source = pattern.to_string();
    let body_and_flags = source
        .strip_prefix('/')
        .and_then(|rest| rest.rsplit_once('/'))
        .filter(|(_, flags)| flags.chars().all(|f| matches!(f, 'g' | 'i' | 'm' | 's')));
    let Some((body, flags)) = body_and_flags else {
        return Err(TwigError::runtime(format!(
            "matches expects a regular expression like /pattern/flags, got {}",
            source
        )));
    };
    let regex = RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()?;
    Ok(regex.is_match(&subject.to_string()))
}
