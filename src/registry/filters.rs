//! Built-in filters.

use std::cmp::Ordering;

use crate::error::{TwigError, TwigResult};
use crate::registry::{date, php};
use crate::value::{EscapeStrategy, Markup, Object, Value};

pub(super) type BuiltinFilter = fn(&Value, &[Value]) -> TwigResult<Value>;

pub(super) const FILTERS: [(&str, BuiltinFilter); 32] = [
    ("upper", upper),
    ("lower", lower),
    ("capitalize", capitalize),
    ("title", title),
    ("length", length),
    ("reverse", reverse),
    ("sort", sort),
    ("keys", keys),
    ("url_encode", url_encode),
    ("join", join),
    ("default", default),
    ("json_encode", json_encode),
    ("merge", merge),
    ("date", date_filter),
    ("date_modify", date_modify),
    ("replace", replace),
    ("format", format),
    ("striptags", striptags),
    ("escape", escape_filter),
    ("e", escape_filter),
    ("nl2br", nl2br),
    ("number_format", number_format),
    ("trim", trim),
    ("truncate", truncate),
    ("slice", slice),
    ("abs", abs),
    ("first", first),
    ("split", split),
    ("last", last),
    ("raw", raw),
    ("batch", batch),
    ("round", round),
];

const DEFAULT_DATE_FORMAT: &str = "F j, Y H:i";

const TRIM_CHARACTERS: &str = " \n\r\t\u{0c}\u{0b}\u{a0}\u{2000}\u{2001}\u{2002}\u{2003}\u{2004}\
    \u{2005}\u{2006}\u{2007}\u{2008}\u{2009}\u{200a}\u{200b}\u{2028}\u{2029}\u{3000}";

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn map_string<F: Fn(&str) -> String>(value: &Value, f: F) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        _ => value.clone(),
    }
}

fn upper(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(map_string(value, str::to_uppercase))
}

fn lower(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(map_string(value, str::to_lowercase))
}

fn capitalize(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(map_string(value, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.as_str().to_lowercase().chars())
                .collect(),
            None => String::new(),
        }
    }))
}

fn title(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(map_string(value, |s| {
        let mut output = String::with_capacity(s.len());
        let mut boundary = true;
        for ch in s.to_lowercase().chars() {
            if boundary && ch.is_ascii_lowercase() {
                output.push(ch.to_ascii_uppercase());
            } else {
                output.push(ch);
            }
            boundary = ch.is_whitespace();
        }
        output
    }))
}

fn length(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::from(value.length()))
}

fn reverse(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::Array(items) => items.iter().rev().cloned().collect(),
        Value::String(_) | Value::Markup(_) => {
            Value::String(value.as_str().unwrap_or_default().chars().rev().collect())
        }
        Value::Object(map) => Value::object(
            map.iter()
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Undefined,
    })
}

/// Orders object values: comparable values directly, then numerically, then
/// as text.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let Some(order) = a.compare(b) {
        return order;
    }
    let (x, y) = (a.parse_float(), b.parse_float());
    if let Some(order) = x.partial_cmp(&y) {
        return order;
    }
    a.to_string().cmp(&b.to_string())
}

fn sort(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::Array(items) => {
            let mut sorted = items.to_vec();
            sorted.sort_by(|a, b| match (a.is_undefined(), b.is_undefined()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.to_string().cmp(&b.to_string()),
            });
            Value::from(sorted)
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            entries.sort_by(|(_, a), (_, b)| compare_values(a, b));
            Value::object(entries.into_iter().collect())
        }
        _ => Value::Undefined,
    })
}

fn keys(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::Undefined | Value::Null => Value::Undefined,
        Value::Object(map) => map.keys().map(|k| Value::from(k.as_str())).collect(),
        Value::Array(items) => (0..items.len()).map(|i| Value::from(i.to_string())).collect(),
        _ => Value::array([]),
    })
}

/// JavaScript `encodeURIComponent`.
pub(crate) fn encode_uri_component(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
        {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn serialize_query(object: &Value, prefix: Option<&str>) -> String {
    object
        .entries()
        .into_iter()
        .map(|(key, value)| {
            let key = match prefix {
                Some(prefix) => format!("{}[{}]", prefix, key),
                None => key.to_string(),
            };
            match value {
                Value::Array(_) | Value::Object(_) => serialize_query(&value, Some(&key)),
                _ => format!(
                    "{}={}",
                    encode_uri_component(&key),
                    encode_uri_component(&value.to_string())
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("&amp;")
}

fn url_encode_text(value: &Value) -> String {
    if let Value::Object(_) = value {
        return serialize_query(value, None);
    }
    encode_uri_component(&value.to_string()).replacen('\'', "%27", 1)
}

fn url_encode(value: &Value, _: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    Ok(Value::String(url_encode_text(value)))
}

fn join(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    let glue = args
        .first()
        .filter(|g| g.is_js_truthy())
        .map(ToString::to_string)
        .unwrap_or_default();
    let parts: Vec<String> = value.values().iter().map(ToString::to_string).collect();
    Ok(Value::String(parts.join(&glue)))
}

fn default(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if args.len() > 1 {
        return Err(TwigError::runtime("default filter expects one argument"));
    }
    let empty = value.is_nullish() || value.as_str() == Some("");
    if empty {
        Ok(args
            .first()
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())))
    } else {
        Ok(value.clone())
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Undefined | Value::Null => "null".to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(json_text).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), json_text(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        _ => value.to_json().to_string(),
    }
}

fn json_encode(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(Value::String(json_text(value)))
}

fn numeric_key(key: &str) -> Option<usize> {
    let digits: String = key.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn merge(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if args.is_empty() {
        return Err(TwigError::runtime("Filter merge expects at least one parameter"));
    }
    let all_arrays = matches!(value, Value::Array(_))
        && args.iter().all(|a| matches!(a, Value::Array(_)));
    if all_arrays {
        let mut merged = value.values();
        for extra in args {
            merged.extend(extra.values());
        }
        return Ok(Value::from(merged));
    }

    let mut merged = Object::new();
    let mut next_index = 0_usize;
    let mut absorb = |source: &Value, merged: &mut Object| match source {
        Value::Array(items) => {
            for item in items.iter() {
                merged.insert(next_index.to_string(), item.clone());
                next_index = next_index.saturating_add(1);
            }
        }
        _ => {
            for (key, item) in source.entries() {
                let key = key.to_string();
                if let Some(index) = numeric_key(&key) {
                    next_index = next_index.max(index.saturating_add(1));
                }
                merged.insert(key, item);
            }
        }
    };
    absorb(value, &mut merged);
    for extra in args {
        absorb(extra, &mut merged);
    }
    Ok(Value::object(merged))
}

fn date_filter(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let when = date::to_date(value)?;
    let format = args
        .first()
        .map_or_else(|| DEFAULT_DATE_FORMAT.to_string(), ToString::to_string)
        .replace("\\\\", "\\");
    Ok(Value::String(date::format(&format, &when)))
}

fn date_modify(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    if args.len() != 1 {
        return Err(TwigError::runtime("date_modify filter expects 1 argument"));
    }
    let modifier = arg(args, 0).to_string();
    let base = match value {
        Value::Date(d) => Some(d.timestamp_millis() as f64 / 1000.0),
        Value::Number(n) => Some(*n),
        _ => date::strtotime(&value.to_string(), None),
    };
    let modified = date::strtotime(&modifier, base).ok_or_else(|| {
        TwigError::runtime(format!("Unable to modify date with '{}'", modifier))
    })?;
    Ok(Value::Date(date::from_seconds(modified, value)?))
}

fn replace(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    let mut text = value.to_string();
    for (search, replacement) in arg(args, 0).entries() {
        let search = search.to_string();
        let replacement = replacement.to_string();
        text = if search.is_empty() {
            text.chars()
                .map(String::from)
                .collect::<Vec<_>>()
                .join(&replacement)
        } else {
            text.replace(&search, &replacement)
        };
    }
    Ok(Value::String(text))
}

fn format(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    php::sprintf(&value.to_string(), args).map(Value::String)
}

fn striptags(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    Ok(Value::String(php::strip_tags(
        &value.to_string(),
        &arg(args, 0).to_string(),
    )))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn escape_js(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match char::from_u32(u32::from(unit)) {
            Some(ch) if ch.is_ascii_alphanumeric() || matches!(ch, ',' | '.' | '_') => {
                escaped.push(ch);
            }
            _ if unit < 0x80 => escaped.push_str(&format!("\\x{:X}", unit)),
            _ => escaped.push_str(&format!("\\u{:04X}", unit)),
        }
    }
    escaped
}

fn escape_css(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match char::from_u32(u32::from(unit)) {
            Some(ch) if ch.is_ascii_alphanumeric() => escaped.push(ch),
            _ => escaped.push_str(&format!("\\{:X} ", unit)),
        }
    }
    escaped
}

fn escape_html_attr(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match char::from_u32(u32::from(unit)) {
            Some(ch) if ch.is_ascii_alphanumeric() || matches!(ch, ',' | '.' | '-' | '_') => {
                escaped.push(ch);
            }
            Some('&') => escaped.push_str("&amp;"),
            Some('<') => escaped.push_str("&lt;"),
            Some('>') => escaped.push_str("&gt;"),
            Some('"') => escaped.push_str("&quot;"),
            _ if unit <= 0x1f && !matches!(unit, 0x09 | 0x0a | 0x0d) => {
                escaped.push_str("&#xFFFD;");
            }
            _ if unit < 0x80 => escaped.push_str(&format!("&#x{:02X};", unit)),
            _ => escaped.push_str(&format!("&#x{:04X};", unit)),
        }
    }
    escaped
}

/// Escapes `value` for `strategy`, marking the result as safe for it.
pub(crate) fn escape(value: &Value, strategy: EscapeStrategy) -> Value {
    let text = value.to_string();
    let escaped = match strategy {
        EscapeStrategy::Html => escape_html(&text),
        EscapeStrategy::Js => escape_js(&text),
        EscapeStrategy::Css => escape_css(&text),
        EscapeStrategy::Url => url_encode_text(value),
        EscapeStrategy::HtmlAttr => escape_html_attr(&text),
    };
    if escaped.is_empty() {
        return Value::String(escaped);
    }
    Value::Markup(Markup::escaped(escaped, strategy))
}

fn escape_filter(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    let strategy = match args.first() {
        None | Some(Value::Bool(true)) => EscapeStrategy::Html,
        Some(name) => name.to_string().parse()?,
    };
    Ok(escape(value, strategy))
}

fn nl2br(value: &Value, _: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    let escaped = escape_html(&value.to_string())
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "<br />\n");
    Ok(Value::markup(escaped))
}

fn number_format(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let decimals = args
        .first()
        .filter(|d| d.is_js_truthy())
        .cloned()
        .unwrap_or_default();
    let text = |index: usize, fallback: &str| {
        args.get(index)
            .filter(|v| !v.is_undefined())
            .map_or_else(|| fallback.to_string(), ToString::to_string)
    };
    Ok(Value::String(php::number_format(
        value,
        &decimals,
        &text(1, "."),
        &text(2, ","),
    )))
}

fn trim(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    let characters = args
        .first()
        .filter(|c| c.is_js_truthy())
        .map_or_else(|| TRIM_CHARACTERS.to_string(), ToString::to_string);
    let text = value.to_string();
    Ok(Value::String(
        text.trim_matches(|c| characters.contains(c)).to_string(),
    ))
}

fn truncate(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let text = value.to_string();
    let truthy = |index: usize| args.get(index).filter(|v| v.is_js_truthy());
    let mut limit = truthy(0).map_or(30.0, Value::to_number);
    let preserve = truthy(1).is_some();
    let separator = truthy(2).map_or_else(|| "...".to_string(), ToString::to_string);

    let chars: Vec<char> = text.chars().collect();
    if (chars.len() as f64) <= limit {
        return Ok(Value::String(text));
    }
    if preserve {
        let start = limit.max(0.0) as usize;
        match chars.iter().skip(start).position(|c| *c == ' ') {
            Some(offset) => limit = start.saturating_add(offset) as f64,
            None => return Ok(Value::String(text)),
        }
    }
    let mut truncated: String = chars.iter().take(limit.max(0.0) as usize).collect();
    truncated.push_str(&separator);
    Ok(Value::String(truncated))
}

fn slice(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    if args.is_empty() {
        return Err(TwigError::runtime("slice filter expects at least 1 argument"));
    }
    let size = value.length() as f64;
    let start = args
        .first()
        .filter(|s| s.is_js_truthy())
        .map_or(0.0, Value::to_number);
    let length = args.get(1).map_or(size, Value::to_number);
    let start = if start >= 0.0 {
        start
    } else {
        (size + start).max(0.0)
    };
    let end = (start + length.max(0.0)).min(size);
    let (start, end) = (start as usize, end.max(start) as usize);

    match value {
        Value::Array(items) => Ok(items
            .iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .cloned()
            .collect()),
        Value::String(_) | Value::Markup(_) => Ok(Value::String(
            value
                .as_str()
                .unwrap_or_default()
                .chars()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect(),
        )),
        _ => Err(TwigError::runtime(
            "slice filter expects value to be an array or string",
        )),
    }
}

fn abs(value: &Value, _: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    Ok(Value::Number(value.to_number().abs()))
}

fn first(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::Array(items) => items.first().cloned().unwrap_or_default(),
        Value::Object(map) => map.values().next().cloned().unwrap_or_default(),
        Value::String(_) | Value::Markup(_) => Value::String(
            value
                .as_str()
                .unwrap_or_default()
                .chars()
                .take(1)
                .collect(),
        ),
        _ => Value::Undefined,
    })
}

fn last(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::Array(items) => items.last().cloned().unwrap_or_default(),
        Value::Object(map) => map.values().last().cloned().unwrap_or_default(),
        Value::String(_) | Value::Markup(_) => value
            .as_str()
            .unwrap_or_default()
            .chars()
            .last()
            .map_or(Value::Undefined, |c| Value::String(c.to_string())),
        _ => Value::Undefined,
    })
}

fn split_text(text: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(delimiter).map(String::from).collect()
    }
}

fn split(value: &Value, args: &[Value]) -> TwigResult<Value> {
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    if args.is_empty() || args.len() > 2 {
        return Err(TwigError::runtime("split filter expects 1 or 2 argument"));
    }
    let Some(text) = value.as_str() else {
        return Err(TwigError::runtime("split filter expects value to be a string"));
    };
    let delimiter = arg(args, 0).to_string();
    let pieces = split_text(text, &delimiter);
    let Some(limit) = args.get(1).filter(|l| !l.is_undefined()).map(Value::to_number) else {
        return Ok(Value::from(pieces));
    };

    if limit < 0.0 {
        let keep = pieces.len() as f64 + limit;
        if keep < 0.0 {
            return Ok(Value::from(pieces));
        }
        return Ok(pieces.into_iter().take(keep as usize).map(Value::from).collect());
    }

    let limit = limit as usize;
    if delimiter.is_empty() {
        let size = limit.max(1);
        let chars: Vec<char> = text.chars().collect();
        return Ok(chars
            .chunks(size)
            .map(|chunk| Value::String(chunk.iter().collect()))
            .collect());
    }
    let head = limit.saturating_sub(1).min(pieces.len());
    let mut limited: Vec<Value> = pieces.iter().take(head).cloned().map(Value::from).collect();
    let rest: Vec<String> = pieces.into_iter().skip(head).collect();
    if !rest.is_empty() {
        limited.push(Value::String(rest.join(&delimiter)));
    }
    Ok(Value::from(limited))
}

fn raw(value: &Value, _: &[Value]) -> TwigResult<Value> {
    Ok(match value {
        Value::String(s) if !s.is_empty() => Value::Markup(Markup::safe(s.as_str())),
        _ => value.clone(),
    })
}

fn batch(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let Value::Array(items) = value else {
        return Err(TwigError::runtime("batch filter expects items to be an array"));
    };
    let Some(Value::Number(size)) = args.first() else {
        return Err(TwigError::runtime("batch filter expects size to be a number"));
    };
    let size = size.ceil();
    if size < 1.0 {
        return Ok(Value::array([]));
    }
    let size = size as usize;
    let fill = arg(args, 1);

    let mut chunks: Vec<Vec<Value>> = items.chunks(size).map(<[Value]>::to_vec).collect();
    if fill.is_js_truthy() && items.len() % size != 0 {
        if let Some(last) = chunks.last_mut() {
            last.resize(size, fill);
        }
    }
    Ok(chunks.into_iter().map(Value::from).collect())
}

fn round(value: &Value, args: &[Value]) -> TwigResult<Value> {
    let number = value.parse_float();
    let precision = arg(args, 0);
    if precision.is_js_truthy() && !matches!(precision, Value::Number(_)) {
        return Err(TwigError::runtime("round filter expects precision to be a number"));
    }
    let precision = if precision.is_undefined() {
        0.0
    } else {
        precision.to_number()
    };
    let factor = 10_f64.powf(precision);
    let rounded = match args.get(1).map(ToString::to_string).as_deref() {
        None | Some("common") => php::round(number, precision as i32),
        Some("floor") => (number * factor).floor() / factor,
        Some("ceil") => (number * factor).ceil() / factor,
        Some(_) => {
            return Err(TwigError::runtime(
                "round filter expects method to be 'floor', 'ceil', or 'common'",
            ));
        }
    };
    Ok(Value::Number(rounded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, value: Value, args: Vec<Value>) -> TwigResult<Value> {
        let (_, filter) = FILTERS.iter().find(|(n, _)| *n == name).unwrap();
        filter(&value, &args)
    }

    fn text(name: &str, value: Value, args: Vec<Value>) -> String {
        apply(name, value, args).unwrap().to_string()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_filters() {
        assert_eq!(text("upper", "hello".into(), vec![]), "HELLO", "upper");
        assert_eq!(text("capitalize", "hELLO wORLD".into(), vec![]), "Hello world", "capitalize");
        assert_eq!(text("title", "hello big world".into(), vec![]), "Hello Big World", "title");
        assert_eq!(text("trim", "  hi \n".into(), vec![]), "hi", "trim");
        assert_eq!(text("trim", "xxhixx".into(), vec!["x".into()]), "hi", "trim chars");
        assert_eq!(
            apply("upper", Value::from(5), vec![]).unwrap(),
            Value::from(5),
            "non-strings pass through"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_collection_filters() {
        let items = Value::from(vec![3, 1, 2]);
        assert_eq!(text("sort", items.clone(), vec![]), "1,2,3", "sort");
        assert_eq!(text("reverse", items.clone(), vec![]), "2,1,3", "reverse");
        assert_eq!(text("join", items.clone(), vec!["-".into()]), "3-1-2", "join");
        assert_eq!(text("first", items.clone(), vec![]), "3", "first");
        assert_eq!(text("last", items.clone(), vec![]), "2", "last");
        assert_eq!(text("length", items, vec![]), "3", "length");
        assert_eq!(text("reverse", "abc".into(), vec![]), "cba", "reverse string");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_merge() {
        let merged = apply(
            "merge",
            Value::from(vec![1, 2]),
            vec![Value::from(vec![3])],
        )
        .unwrap();
        assert_eq!(merged, Value::from(vec![1, 2, 3]), "arrays concatenate");

        let mut extra = Object::new();
        extra.insert("4".to_string(), Value::from("value"));
        let merged = apply(
            "merge",
            Value::from(vec!["a", "b"]),
            vec![Value::object(extra), Value::from(vec!["c", "d"])],
        )
        .unwrap();
        let keys: Vec<String> = merged.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["0", "1", "4", "5", "6"], "numeric keys advance the index");

        assert_eq!(
            apply("merge", Value::from(vec![1]), vec![]),
            Err(TwigError::runtime("Filter merge expects at least one parameter")),
            "needs a parameter"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_default() {
        assert_eq!(text("default", Value::Undefined, vec!["x".into()]), "x", "undefined");
        assert_eq!(text("default", "".into(), vec!["x".into()]), "x", "empty string");
        assert_eq!(text("default", "a".into(), vec!["x".into()]), "a", "present");
        assert_eq!(
            apply("default", Value::Null, vec!["x".into(), "y".into()]),
            Err(TwigError::runtime("default filter expects one argument")),
            "too many arguments"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape_strategies() {
        assert_eq!(
            text("escape", "<a href=\"x\">'</a>".into(), vec![]),
            "&lt;a href=&quot;x&quot;&gt;&#039;&lt;/a&gt;",
            "html"
        );
        assert_eq!(text("e", "a b".into(), vec!["js".into()]), "a\\x20b", "js");
        assert_eq!(text("e", "a b".into(), vec!["css".into()]), "a\\20 b", "css");
        assert_eq!(text("e", "a b&c".into(), vec!["url".into()]), "a%20b%26c", "url");
        assert_eq!(
            text("e", "a b".into(), vec!["html_attr".into()]),
            "a&#x20;b",
            "html_attr"
        );
        assert_eq!(
            apply("e", "a".into(), vec!["yaml".into()]),
            Err(TwigError::runtime("escape strategy unsupported")),
            "unknown strategy"
        );
        match apply("e", "<".into(), vec![]).unwrap() {
            Value::Markup(m) => assert!(m.is_safe_for(EscapeStrategy::Html), "marked safe"),
            other => panic!("expected markup, got {:?}", other),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_slice_and_split() {
        let items = Value::from(vec![1, 2, 3, 4, 5]);
        assert_eq!(text("slice", items.clone(), vec![1.into(), 2.into()]), "2,3", "array");
        assert_eq!(text("slice", items, vec![Value::from(-2)]), "4,5", "negative start");
        assert_eq!(text("slice", "abcdef".into(), vec![2.into(), 3.into()]), "cde", "string");
        assert_eq!(
            apply("slice", Value::from(3), vec![1.into()]),
            Err(TwigError::runtime(
                "slice filter expects value to be an array or string"
            )),
            "numbers cannot be sliced"
        );

        let split = |args: Vec<Value>| apply("split", "one,two,three,four".into(), args).unwrap();
        assert_eq!(split(vec![",".into()]).length(), 4, "plain");
        assert_eq!(
            split(vec![",".into(), 2.into()]),
            Value::from(vec!["one", "two,three,four"]),
            "limit"
        );
        assert_eq!(
            split(vec![",".into(), Value::from(-1)]),
            Value::from(vec!["one", "two", "three"]),
            "negative limit"
        );
        assert_eq!(
            apply("split", "aabbcc".into(), vec!["".into(), 2.into()]).unwrap(),
            Value::from(vec!["aa", "bb", "cc"]),
            "chunks"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_batch_and_round() {
        let batched = apply(
            "batch",
            Value::from(vec![1, 2, 3]),
            vec![2.into(), "x".into()],
        )
        .unwrap();
        assert_eq!(batched.length(), 2, "two rows");
        assert_eq!(
            batched.as_array().and_then(|rows| rows.get(1)).cloned(),
            Some(Value::from(vec![Value::from(3), Value::from("x")])),
            "filled"
        );
        assert_eq!(text("round", Value::from(2.5), vec![]), "3", "common");
        assert_eq!(
            text("round", Value::from(2.46), vec![1.into(), "floor".into()]),
            "2.4",
            "floor with precision"
        );
        assert_eq!(
            apply("round", Value::from(1), vec![0.into(), "sqrt".into()]),
            Err(TwigError::runtime(
                "round filter expects method to be 'floor', 'ceil', or 'common'"
            )),
            "bad method"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_misc_filters() {
        assert_eq!(text("nl2br", "a\nb".into(), vec![]), "a<br />\nb", "nl2br");
        assert_eq!(
            text("truncate", "hello world".into(), vec![5.into()]),
            "hello...",
            "truncate"
        );
        assert_eq!(
            text("truncate", "hello world foo".into(), vec![3.into(), true.into()]),
            "hello...",
            "truncate on word"
        );
        assert_eq!(text("number_format", Value::from(1234.5), vec![]), "1,235", "number_format");
        assert_eq!(
            text("json_encode", Value::from(vec![Value::from("a"), Value::Null]), vec![]),
            "[\"a\",null]",
            "json_encode"
        );
        assert_eq!(
            text("url_encode", "a b'c".into(), vec![]),
            "a%20b%27c",
            "url_encode"
        );
        let mut pairs = Object::new();
        pairs.insert("%name%".to_string(), Value::from("World"));
        assert_eq!(
            text("replace", "Hello %name%".into(), vec![Value::object(pairs)]),
            "Hello World",
            "replace"
        );
        assert_eq!(text("date", Value::from(0), vec!["Y-m-d".into()]), "1970-01-01", "date");
        assert_eq!(text("abs", Value::from(-3), vec![]), "3", "abs");
    }

    // Compiles the striptags and sprintf patterns on first use.
    #[test]
    #[ntest::timeout(1000)]
    fn test_pattern_filters() {
        assert_eq!(text("striptags", "<b>x</b>".into(), vec![]), "x", "striptags");
        assert_eq!(
            text("format", "%s is %d".into(), vec!["x".into(), 5.into()]),
            "x is 5",
            "format"
        );
    }
}
