use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{MacroParameter, Token};
use crate::error::{TwigError, TwigResult};
use crate::interface::Context;
use crate::promise::Promise;
use crate::template::{Template, TemplateOptions};

/// Ordered map used for template objects.
pub type Object = IndexMap<String, Value>;

/// Escaping strategies understood by the `escape` filter and `autoescape`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EscapeStrategy {
    #[default]
    Html,
    Js,
    Css,
    Url,
    HtmlAttr,
}

impl EscapeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Js => "js",
            Self::Css => "css",
            Self::Url => "url",
            Self::HtmlAttr => "html_attr",
        }
    }
}

impl FromStr for EscapeStrategy {
    type Err = TwigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(Self::Html),
            "js" => Ok(Self::Js),
            "css" => Ok(Self::Css),
            "url" => Ok(Self::Url),
            "html_attr" => Ok(Self::HtmlAttr),
            _ => Err(TwigError::runtime("escape strategy unsupported")),
        }
    }
}

impl fmt::Display for EscapeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text that must not be escaped again.
///
/// `safe_for == None` means the content is safe for every strategy, which is
/// what raw template text and `raw` filtered values carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markup {
    content: String,
    safe_for: Option<EscapeStrategy>,
}

impl Markup {
    pub fn safe<T: Into<String>>(content: T) -> Self {
        Self {
            content: content.into(),
            safe_for: None,
        }
    }

    pub fn escaped<T: Into<String>>(content: T, strategy: EscapeStrategy) -> Self {
        Self {
            content: content.into(),
            safe_for: Some(strategy),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }

    /// `html_attr` output is also valid inside plain html.
    pub fn is_safe_for(&self, strategy: EscapeStrategy) -> bool {
        match self.safe_for {
            None => true,
            Some(own) => {
                own == strategy
                    || (strategy == EscapeStrategy::Html && own == EscapeStrategy::HtmlAttr)
            }
        }
    }
}

/// A callable supplied by the embedding application.
#[derive(Clone)]
pub struct Function(Rc<dyn Fn(&[Value]) -> TwigResult<Value>>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> TwigResult<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> TwigResult<Value> {
        (self.0)(args)
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

pub(crate) type MacroTable = Rc<std::cell::RefCell<Object>>;

/// A macro captured from a `{% macro %}` definition.
#[derive(Debug)]
pub struct Macro {
    pub(crate) name: String,
    pub(crate) parameters: Vec<MacroParameter>,
    pub(crate) body: Vec<Token>,
    pub(crate) template: Rc<Template>,
    pub(crate) options: Rc<TemplateOptions>,
    pub(crate) definition_context: Context,
    pub(crate) macros: MacroTable,
}

impl Macro {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A runtime template value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Markup(Markup),
    Array(Rc<Vec<Value>>),
    Object(Rc<Object>),
    Date(DateTime<Utc>),
    Function(Function),
    Macro(Rc<Macro>),
    Template(Rc<Template>),
    Promise(Promise),
}

static PARSE_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)")
        .expect("parseFloat pattern is valid")
});

impl Value {
    pub fn array<I: IntoIterator<Item = Self>>(items: I) -> Self {
        Self::Array(Rc::new(items.into_iter().collect()))
    }

    pub fn object(map: Object) -> Self {
        Self::Object(Rc::new(map))
    }

    /// Markup safe for every strategy; empty text stays a plain string.
    pub fn markup<T: Into<String>>(content: T) -> Self {
        let content = content.into();
        if content.is_empty() {
            Self::String(content)
        } else {
            Self::Markup(Markup::safe(content))
        }
    }

    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Macro(_))
    }

    /// Borrowed text for strings and markup.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Markup(m) => Some(m.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) | Self::Markup(_) => "string",
            Self::Array(_) => "array",
            Self::Date(_) => "date",
            Self::Function(_) | Self::Macro(_) => "function",
            Self::Object(_) | Self::Template(_) | Self::Promise(_) => "object",
        }
    }

    /// PHP `boolval` truthiness: `false`, `0`, `""`, `"0"`, `[]`, null and
    /// undefined are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !(s.is_empty() || s == "0"),
            Self::Markup(m) => !(m.as_str().is_empty() || m.as_str() == "0"),
            Self::Array(items) => !items.is_empty(),
            Self::Object(_)
            | Self::Date(_)
            | Self::Function(_)
            | Self::Macro(_)
            | Self::Template(_)
            | Self::Promise(_) => true,
        }
    }

    /// Plain JavaScript truthiness.
    pub(crate) fn is_js_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Markup(m) => !m.as_str().is_empty(),
            Self::Array(_)
            | Self::Object(_)
            | Self::Date(_)
            | Self::Function(_)
            | Self::Macro(_)
            | Self::Template(_)
            | Self::Promise(_) => true,
        }
    }

    /// JavaScript `Number(value)`.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Markup(m) => string_to_number(m.as_str()),
            Self::Array(_) => string_to_number(&self.to_string()),
            Self::Date(d) => d.timestamp_millis() as f64,
            Self::Object(_)
            | Self::Function(_)
            | Self::Macro(_)
            | Self::Template(_)
            | Self::Promise(_) => f64::NAN,
        }
    }

    /// JavaScript `parseFloat(value)`: the longest numeric prefix of the text.
    pub fn parse_float(&self) -> f64 {
        if let Self::Number(n) = self {
            return *n;
        }
        let text = self.to_string();
        let text = text.trim_start();
        match PARSE_FLOAT.find(text) {
            Some(found) => {
                let digits = found.as_str();
                match digits.trim_start_matches(['+', '-']) {
                    "Infinity" if digits.starts_with('-') => f64::NEG_INFINITY,
                    "Infinity" => f64::INFINITY,
                    _ => digits.parse().unwrap_or(f64::NAN),
                }
            }
            None => f64::NAN,
        }
    }

    /// Length as reported by the `length` filter.
    pub fn length(&self) -> usize {
        match self {
            Self::String(s) => s.chars().count(),
            Self::Markup(m) => m.as_str().chars().count(),
            Self::Array(items) => items.len(),
            Self::Object(map) => map.len(),
            _ => 0,
        }
    }

    /// Plain index lookup used by `object[key]` access.
    pub fn get_key(&self, key: &Self) -> Option<Self> {
        match self {
            Self::Object(map) => map.get(&key.to_string()).cloned(),
            Self::Array(items) => index_of(key).and_then(|i| items.get(i)).cloned(),
            Self::String(_) | Self::Markup(_) => {
                let text = self.as_str().unwrap_or_default();
                if key.as_str() == Some("length") {
                    return Some(Self::from(text.chars().count()));
                }
                index_of(key)
                    .and_then(|i| text.chars().nth(i))
                    .map(|c| Self::String(c.to_string()))
            }
            _ => None,
        }
    }

    /// Entries for iteration: arrays yield their indices as keys.
    pub fn entries(&self) -> Vec<(Self, Self)> {
        match self {
            Self::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Self::from(i), v.clone()))
                .collect(),
            Self::Object(map) => map
                .iter()
                .map(|(k, v)| (Self::String(k.clone()), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Element values of arrays or objects.
    pub fn values(&self) -> Vec<Self> {
        match self {
            Self::Array(items) => items.to_vec(),
            Self::Object(map) => map.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// JavaScript `===`. Arrays, objects and callables compare by identity.
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Markup(a), Self::Markup(b)) => a.as_str() == b.as_str(),
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Macro(a), Self::Macro(b)) => Rc::ptr_eq(a, b),
            (Self::Template(a), Self::Template(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// JavaScript `==`.
    pub fn loose_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined | Self::Null, Self::Undefined | Self::Null) => true,
            (Self::Undefined | Self::Null, _) | (_, Self::Undefined | Self::Null) => false,
            (Self::Bool(b), _) => Self::Number(f64::from(u8::from(*b))).loose_equals(other),
            (_, Self::Bool(b)) => self.loose_equals(&Self::Number(f64::from(u8::from(*b)))),
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Number(n), _) if other.as_str().is_some() => *n == other.to_number(),
            (_, Self::Number(n)) if self.as_str().is_some() => self.to_number() == *n,
            _ if self.as_str().is_some() && other.as_str().is_some() => {
                self.as_str() == other.as_str()
            }
            _ if self.is_primitive() && !other.is_primitive() => {
                self.loose_equals(&other.to_primitive())
            }
            _ if !self.is_primitive() && other.is_primitive() => {
                self.to_primitive().loose_equals(other)
            }
            _ => self.strict_equals(other),
        }
    }

    /// JavaScript abstract relational comparison; `None` when either side
    /// converts to `NaN`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        let left = self.to_primitive();
        let right = other.to_primitive();
        match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => left.to_number().partial_cmp(&right.to_number()),
        }
    }

    const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined
                | Self::Null
                | Self::Bool(_)
                | Self::Number(_)
                | Self::String(_)
                | Self::Markup(_)
        )
    }

    fn to_primitive(&self) -> Self {
        match self {
            Self::Date(d) => Self::Number(d.timestamp_millis() as f64),
            Self::Undefined
            | Self::Null
            | Self::Bool(_)
            | Self::Number(_)
            | Self::String(_)
            | Self::Markup(_) => self.clone(),
            Self::Array(_)
            | Self::Object(_)
            | Self::Function(_)
            | Self::Macro(_)
            | Self::Template(_)
            | Self::Promise(_) => Self::String(self.to_string()),
        }
    }

    /// Converts to JSON the way `JSON.stringify` would see the value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined
            | Self::Null
            | Self::Function(_)
            | Self::Macro(_)
            | Self::Template(_)
            | Self::Promise(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Markup(m) => serde_json::Value::String(m.as_str().to_string()),
            Self::Array(items) => items.iter().map(Self::to_json).collect(),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Self::Undefined | Self::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn index_of(key: &Value) -> Option<usize> {
    let n = key.to_number();
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if t.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Formats a number the way JavaScript's `String(number)` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if n.fract() == 0.0 && abs < 1e21 {
        return format!("{:.0}", n);
    }
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        };
    }
    format!("{}", n)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined | Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::Markup(m) => f.write_str(m.as_str()),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Self::Object(_) | Self::Template(_) => f.write_str("[object Object]"),
            Self::Date(d) => write!(
                f,
                "{}",
                d.format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
            ),
            Self::Function(_) | Self::Macro(_) => f.write_str("function"),
            Self::Promise(_) => f.write_str("[object Promise]"),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality, mainly for assertions. Template logic uses
    /// [`Value::strict_equals`] and [`Value::loose_equals`].
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Markup(a), Self::Markup(b)) => a == b,
            _ => self.strict_equals(other),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Markup> for Value {
    fn from(value: Markup) -> Self {
        Self::Markup(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

impl From<Promise> for Value {
    fn from(value: Promise) -> Self {
        Self::Promise(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(Rc::new(value))
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::array(value.into_iter().map(Into::into))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl FromIterator<Self> for Value {
    fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        Self::array(iter)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => items.into_iter().map(Self::from).collect(),
            serde_json::Value::Object(map) => {
                Self::object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_format_number() {
        assert_eq!(format_number(7.0), "7", "integers have no fraction");
        assert_eq!(format_number(-0.0), "0", "negative zero");
        assert_eq!(format_number(0.5), "0.5", "fractions");
        assert_eq!(format_number(1e21), "1e+21", "large exponent");
        assert_eq!(format_number(f64::NAN), "NaN", "nan");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_truthiness() {
        assert!(!Value::from("0").is_truthy(), "\"0\" is false");
        assert!(!Value::array([]).is_truthy(), "empty array is false");
        assert!(Value::object(Object::new()).is_truthy(), "objects are true");
        assert!(Value::Number(f64::NAN).is_truthy(), "NaN is not zero");
        assert!(!Value::Undefined.is_truthy(), "undefined is false");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_float() {
        assert_eq!(Value::from("3.5px").parse_float(), 3.5, "numeric prefix");
        assert_eq!(Value::from("  -2").parse_float(), -2.0, "leading space");
        assert!(Value::from("abc").parse_float().is_nan(), "no digits");
        assert!(Value::Null.parse_float().is_nan(), "null is NaN");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loose_equality() {
        assert!(Value::from("1").loose_equals(&Value::from(1)), "string and number");
        assert!(Value::Null.loose_equals(&Value::Undefined), "null and undefined");
        assert!(Value::Bool(true).loose_equals(&Value::from(1)), "bool and number");
        assert!(!Value::from("a").loose_equals(&Value::from("b")), "different strings");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compare() {
        assert_eq!(
            Value::from("10").compare(&Value::from(9)),
            Some(Ordering::Greater),
            "numeric when one side is a number"
        );
        assert_eq!(
            Value::from("10").compare(&Value::from("9")),
            Some(Ordering::Less),
            "lexicographic for two strings"
        );
        assert_eq!(Value::Undefined.compare(&Value::from(1)), None, "NaN");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_display() {
        let array = Value::from(vec![Value::from(1), Value::Null, Value::from("a")]);
        assert_eq!(array.to_string(), "1,,a", "arrays join with commas");
        assert_eq!(Value::Undefined.to_string(), "", "undefined renders empty");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": [1, 2.5, "x"], "b": null});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json, "round trip through Value");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_markup_safety() {
        let attr = Markup::escaped("x", EscapeStrategy::HtmlAttr);
        assert!(attr.is_safe_for(EscapeStrategy::Html), "html_attr is html safe");
        assert!(!attr.is_safe_for(EscapeStrategy::Js), "but not js safe");
        assert!(Markup::safe("x").is_safe_for(EscapeStrategy::Css), "raw is always safe");
    }
}
