//! Splits an expression into lexemes.
//!
//! Definitions are tried in a fixed order. A definition only matches when
//! the previous lexeme lists it as a valid successor, which is how `(` is
//! told apart as a sub-expression or a parameter list, and `[` as an array,
//! a slice or a key lookup.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{TwigError, TwigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LexKind {
    Test,
    Comma,
    Number,
    BinaryOperator,
    UnaryOperator,
    String,
    SubexpressionStart,
    SubexpressionEnd,
    ParameterStart,
    ParameterEnd,
    Slice,
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    Filter,
    Function,
    Variable,
    KeyPeriod,
    KeyBrackets,
    Null,
    Context,
    Bool,
}

use LexKind as K;

const ORDER: [LexKind; 23] = [
    K::Test,
    K::Comma,
    K::Number,
    K::BinaryOperator,
    K::UnaryOperator,
    K::String,
    K::SubexpressionStart,
    K::SubexpressionEnd,
    K::ParameterStart,
    K::ParameterEnd,
    K::Slice,
    K::ArrayStart,
    K::ArrayEnd,
    K::ObjectStart,
    K::ObjectEnd,
    K::Filter,
    K::Function,
    K::Variable,
    K::KeyPeriod,
    K::KeyBrackets,
    K::Null,
    K::Context,
    K::Bool,
];

/// What may follow a complete value.
const OPERATIONS: &[LexKind] = &[
    K::Filter,
    K::UnaryOperator,
    K::BinaryOperator,
    K::ArrayEnd,
    K::ObjectEnd,
    K::ParameterEnd,
    K::SubexpressionEnd,
    K::Comma,
    K::Test,
];

/// What may start a value.
const EXPRESSIONS: &[LexKind] = &[
    K::Function,
    K::Bool,
    K::String,
    K::Variable,
    K::Number,
    K::Null,
    K::Context,
    K::ParameterStart,
    K::ArrayStart,
    K::ObjectStart,
    K::SubexpressionStart,
    K::UnaryOperator,
];

const KEY_ACCESS: &[LexKind] = &[K::KeyPeriod, K::KeyBrackets, K::Slice];

pub(crate) const RESERVED_WORDS: &[&str] = &[
    "true", "false", "null", "TRUE", "FALSE", "NULL", "_context", "and", "b-and", "or", "b-or",
    "b-xor", "in", "not in", "if", "matches", "starts", "ends", "with",
];

impl LexKind {
    /// Whether `self` may directly follow a lexeme of kind `previous`.
    fn may_follow(self, previous: Self) -> bool {
        let operations_extended = || OPERATIONS.contains(&self) || KEY_ACCESS.contains(&self);
        match previous {
            K::Test => OPERATIONS.contains(&self) || self == K::ParameterStart,
            K::Comma => EXPRESSIONS.contains(&self) || matches!(self, K::ArrayEnd | K::ObjectEnd),
            K::Number | K::Null | K::Bool => OPERATIONS.contains(&self),
            K::BinaryOperator | K::UnaryOperator => EXPRESSIONS.contains(&self),
            K::SubexpressionStart => {
                EXPRESSIONS.contains(&self) || self == K::SubexpressionEnd
            }
            K::ParameterStart => EXPRESSIONS.contains(&self) || self == K::ParameterEnd,
            K::ArrayStart => EXPRESSIONS.contains(&self) || self == K::ArrayEnd,
            K::ObjectStart => EXPRESSIONS.contains(&self) || self == K::ObjectEnd,
            K::String
            | K::SubexpressionEnd
            | K::ParameterEnd
            | K::Slice
            | K::ArrayEnd
            | K::ObjectEnd => operations_extended(),
            K::Filter | K::Variable | K::KeyPeriod | K::KeyBrackets | K::Context => {
                operations_extended() || self == K::ParameterStart
            }
            K::Function => self == K::ParameterStart,
        }
    }
}

impl fmt::Display for LexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            K::Test => "test",
            K::Comma => "comma",
            K::Number => "number",
            K::BinaryOperator => "operator.binary",
            K::UnaryOperator => "operator.unary",
            K::String => "string",
            K::SubexpressionStart => "subexpression.start",
            K::SubexpressionEnd => "subexpression.end",
            K::ParameterStart => "parameter.start",
            K::ParameterEnd => "parameter.end",
            K::Slice => "slice",
            K::ArrayStart => "array.start",
            K::ArrayEnd => "array.end",
            K::ObjectStart => "object.start",
            K::ObjectEnd => "object.end",
            K::Filter => "filter",
            K::Function => "function",
            K::Variable => "variable",
            K::KeyPeriod => "key.period",
            K::KeyBrackets => "key.brackets",
            K::Null => "null",
            K::Context => "context",
            K::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A matched lexeme. `value` is the matched text (for binary operators it is
/// the trimmed operator) and `groups` the capture groups of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Lexeme {
    pub kind: LexKind,
    pub value: String,
    pub groups: Vec<Option<String>>,
}

struct Matched {
    value: String,
    groups: Vec<Option<String>>,
    /// Bytes of input consumed, which may be shorter than `value`.
    consumed: usize,
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("expression pattern is valid"));
    };
}

pattern!(TEST, r"^is\s+(not)?\s*([a-zA-Z_][a-zA-Z0-9_]*(\s?as)?)");
pattern!(NUMBER, r"^-?\d+(\.\d+)?");
pattern!(UNARY, r"^not\s+");
pattern!(SLICE, r"^\[(\d*:\d*)\]");
pattern!(FILTER, r"^\|\s?([a-zA-Z_][a-zA-Z0-9_\-]*)");
pattern!(FUNCTION, r"^([a-zA-Z_][a-zA-Z0-9_]*)\s*\(");
pattern!(VARIABLE, r"^[a-zA-Z_][a-zA-Z0-9_]*");
pattern!(KEY_PERIOD, r"^\.([a-zA-Z0-9_]+)");
pattern!(KEY_BRACKETS, r"^\[([^\]:]*)\]");
pattern!(NULL, r"^(null|NULL|none|NONE)");
pattern!(CONTEXT, r"^_context");
pattern!(BOOL, r"^(true|TRUE|false|FALSE)");

fn regex_match(re: &Regex, input: &str) -> Option<Matched> {
    let captures = re.captures(input)?;
    let whole = captures.get(0)?;
    Some(Matched {
        value: whole.as_str().to_string(),
        groups: captures
            .iter()
            .skip(1)
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect(),
        consumed: whole.end(),
    })
}

fn literal(input: &str, text: &str) -> Option<Matched> {
    input.starts_with(text).then(|| Matched {
        value: text.to_string(),
        groups: Vec::new(),
        consumed: text.len(),
    })
}

/// Keyword operators must be followed by whitespace or `(`; a `(` is left in
/// the input.
fn keyword_operator(input: &str, word: &str) -> Option<Matched> {
    let rest = input.strip_prefix(word)?;
    let next = rest.chars().next()?;
    if next == '(' {
        Some(Matched {
            value: word.to_string(),
            groups: Vec::new(),
            consumed: word.len(),
        })
    } else if next.is_whitespace() {
        Some(Matched {
            value: word.to_string(),
            groups: Vec::new(),
            consumed: word.len() + next.len_utf8(),
        })
    } else {
        None
    }
}

fn binary_operator(input: &str) -> Option<Matched> {
    const SYMBOLS: &[&str] = &[
        "??", "?:", "b-and", "b-or", "b-xor", "+", "-", "~", "%", "?",
    ];
    if let Some(found) = SYMBOLS.iter().find_map(|s| literal(input, s)) {
        return Some(found);
    }
    if let Some(rest) = input.strip_prefix(':') {
        // `:` directly followed by `<digit>]` belongs to a slice
        let mut chars = rest.chars();
        let is_slice = matches!(
            (chars.next(), chars.next()),
            (Some(d), Some(']')) if d.is_ascii_digit()
        );
        if !is_slice {
            return literal(input, ":");
        }
    }
    const COMPARISONS: &[&str] = &[
        "===", "==", "!==", "!=", "<=", ">=", "<", ">", "!", "**", "*", "//", "/",
    ];
    if let Some(found) = COMPARISONS.iter().find_map(|s| literal(input, s)) {
        return Some(found);
    }
    if let Some(found) = ["and", "or", "in", "not in"]
        .iter()
        .find_map(|w| keyword_operator(input, w))
    {
        return Some(found);
    }
    ["matches", "starts with", "ends with", ".."]
        .iter()
        .find_map(|w| literal(input, w))
}

/// A quoted string with backslash escapes.
fn string_literal(input: &str) -> Option<Matched> {
    let quote = input.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut escaped = false;
    for (index, ch) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            let end = index + ch.len_utf8();
            let value = input.get(..end)?.to_string();
            return Some(Matched {
                value,
                groups: vec![Some(quote.to_string())],
                consumed: end,
            });
        }
    }
    None
}

fn definition_match(kind: LexKind, input: &str) -> Option<Matched> {
    match kind {
        K::Test => regex_match(&TEST, input),
        K::Comma => literal(input, ","),
        K::Number => regex_match(&NUMBER, input),
        K::BinaryOperator => binary_operator(input),
        K::UnaryOperator => regex_match(&UNARY, input),
        K::String => string_literal(input),
        K::SubexpressionStart | K::ParameterStart => literal(input, "("),
        K::SubexpressionEnd | K::ParameterEnd => literal(input, ")"),
        K::Slice => regex_match(&SLICE, input),
        K::ArrayStart => literal(input, "["),
        K::ArrayEnd => literal(input, "]"),
        K::ObjectStart => literal(input, "{"),
        K::ObjectEnd => literal(input, "}"),
        K::Filter => regex_match(&FILTER, input),
        K::Function => regex_match(&FUNCTION, input).map(|mut m| {
            // the `(` stays in the input to become a parameter start
            m.consumed = m.consumed.saturating_sub(1);
            m
        }),
        K::Variable => regex_match(&VARIABLE, input),
        K::KeyPeriod => regex_match(&KEY_PERIOD, input),
        K::KeyBrackets => regex_match(&KEY_BRACKETS, input),
        K::Null => regex_match(&NULL, input),
        K::Context => regex_match(&CONTEXT, input),
        K::Bool => regex_match(&BOOL, input),
    }
}

/// Extra acceptance checks some definitions apply on top of the pattern.
fn validate(kind: LexKind, matched: &Matched, lexemes: &[Lexeme]) -> bool {
    match kind {
        K::SubexpressionEnd => follows_subexpression_start(lexemes),
        K::ParameterStart => lexemes
            .last()
            .is_some_and(|last| !RESERVED_WORDS.contains(&last.value.trim())),
        K::Function => matched
            .groups
            .first()
            .and_then(Option::as_deref)
            .is_some_and(|name| !RESERVED_WORDS.contains(&name)),
        K::Variable => !RESERVED_WORDS.contains(&matched.value.as_str()),
        K::Test
        | K::Comma
        | K::Number
        | K::BinaryOperator
        | K::UnaryOperator
        | K::String
        | K::SubexpressionStart
        | K::ParameterEnd
        | K::Slice
        | K::ArrayStart
        | K::ArrayEnd
        | K::ObjectStart
        | K::ObjectEnd
        | K::Filter
        | K::KeyPeriod
        | K::KeyBrackets
        | K::Null
        | K::Context
        | K::Bool => true,
    }
}

/// A `)` closes a sub-expression only when an unmatched `(` sub-expression
/// start precedes it with no parameter list left open in between.
fn follows_subexpression_start(lexemes: &[Lexeme]) -> bool {
    let mut found = false;
    let mut nested_end = false;
    let mut unclosed_parameters: i32 = 0;
    for lexeme in lexemes.iter().rev() {
        found = lexeme.kind == K::SubexpressionStart;
        if found && nested_end {
            nested_end = false;
            found = false;
        }
        match lexeme.kind {
            K::ParameterStart => unclosed_parameters = unclosed_parameters.saturating_add(1),
            K::ParameterEnd => unclosed_parameters = unclosed_parameters.saturating_sub(1),
            K::SubexpressionEnd => nested_end = true,
            _ => {}
        }
        if found {
            break;
        }
    }
    found && unclosed_parameters == 0
}

/// Splits `expression` into lexemes.
pub(crate) fn tokenize(expression: &str) -> TwigResult<Vec<Lexeme>> {
    let mut lexemes: Vec<Lexeme> = Vec::new();
    let mut rest = expression.trim();
    let mut offset = expression.len().saturating_sub(expression.trim_start().len());

    while !rest.is_empty() {
        let mut invalid_matches = Vec::new();
        let mut found = None;

        for kind in ORDER {
            let Some(matched) = definition_match(kind, rest) else {
                continue;
            };
            if let Some(previous) = lexemes.last() {
                if !kind.may_follow(previous.kind) {
                    let near: String = matched.value.chars().take(20).collect();
                    invalid_matches.push(format!(
                        "{} cannot follow a {} at template:{} near '{}...'",
                        kind, previous.kind, offset, near
                    ));
                    continue;
                }
            }
            if !validate(kind, &matched, &lexemes) {
                continue;
            }
            found = Some((kind, matched));
            break;
        }

        let Some((kind, matched)) = found else {
            return Err(if invalid_matches.is_empty() {
                TwigError::syntax(format!(
                    "Unable to parse '{}' at template position{}",
                    rest, offset
                ))
            } else {
                TwigError::syntax(invalid_matches.join(" OR "))
            });
        };

        log::trace!("matched {} lexeme {:?}", kind, matched.value);
        let value = if kind == K::BinaryOperator {
            matched.value.trim().to_string()
        } else {
            matched.value
        };
        lexemes.push(Lexeme {
            kind,
            value,
            groups: matched.groups,
        });

        let remaining = rest.get(matched.consumed..).unwrap_or_default();
        let trimmed = remaining.trim_start();
        offset = offset
            .saturating_add(matched.consumed)
            .saturating_add(remaining.len().saturating_sub(trimmed.len()));
        rest = trimmed.trim_end();
    }

    Ok(lexemes)
}
