//! PHP runtime helpers that Twig filters are defined in terms of.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{TwigError, TwigResult};
use crate::value::{Value, format_number};

static SPRINTF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%%|%(?:(\d+)\$)?((?:[-+#0 ]|'[\s\S])*)(\d+)?(?:\.(\d*))?([\s\S])")
        .expect("sprintf pattern is valid")
});

static ALLOWED_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[a-z][a-z0-9]*>").expect("allowed tag pattern is valid"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?([a-z][a-z0-9]*)\b[^>]*>").expect("tag pattern is valid")
});

static COMMENT_OR_PHP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!--[\s\S]*?-->|<\?(?:php)?[\s\S]*?\?>").expect("comment pattern is valid")
});

/// JavaScript `Math.round`: halves round towards positive infinity.
pub(crate) fn js_round(value: f64) -> f64 {
    let floor = value.floor();
    if value - floor >= 0.5 { floor + 1.0 } else { floor }
}

/// PHP `round` with the default half-away-from-zero mode.
pub(crate) fn round(value: f64, precision: i32) -> f64 {
    let factor = 10_f64.powi(precision);
    let scaled = value * factor;
    let sign = scaled.signum();
    if scaled % 1.0 == 0.5 * sign {
        (scaled.floor() + f64::from(u8::from(sign > 0.0))) / factor
    } else {
        js_round(scaled) / factor
    }
}

/// Formatting state for one `sprintf` conversion.
struct Spec {
    pad: char,
    left: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn parse(modifiers: &str, width: Option<&str>, precision: Option<&str>) -> Self {
        let mut spec = Self {
            pad: ' ',
            left: false,
            plus: false,
            width: width.and_then(|w| w.parse().ok()).unwrap_or(0),
            precision: precision.filter(|p| !p.is_empty()).and_then(|p| p.parse().ok()),
        };
        let mut chars = modifiers.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ' ' | '0' => spec.pad = ch,
                '+' => spec.plus = true,
                '-' => spec.left = true,
                '\'' => {
                    if let Some(custom) = chars.next() {
                        spec.pad = custom;
                    }
                }
                _ => {}
            }
        }
        spec
    }

    /// Pads to the minimum width, keeping a sign in front of zero padding.
    fn justify(&self, value: String, prefix: &str) -> String {
        let length = value.chars().count();
        if self.width <= length {
            return value;
        }
        let fill: String = std::iter::repeat_n(self.pad, self.width.saturating_sub(length)).collect();
        if !self.left && self.pad == '0' {
            let zeros = "0".repeat(self.width.saturating_sub(length));
            match value.strip_prefix(prefix) {
                Some(rest) => format!("{}{}{}", prefix, zeros, rest),
                None => format!("{}{}", zeros, value),
            }
        } else if self.left {
            format!("{}{}", value, fill)
        } else {
            format!("{}{}", fill, value)
        }
    }
}

fn pad_left(text: String, width: usize, pad: char) -> String {
    let length = text.chars().count();
    if length >= width {
        return text;
    }
    let mut padded: String = std::iter::repeat_n(pad, width.saturating_sub(length)).collect();
    padded.push_str(&text);
    padded
}

fn to_uint32(value: &Value) -> u32 {
    let n = value.to_number();
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

fn exponential(value: f64, digits: usize) -> String {
    let formatted = format!("{:.*e}", digits, value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => formatted,
    }
}

fn to_precision(value: f64, precision: Option<usize>) -> String {
    let Some(precision) = precision.filter(|p| *p > 0) else {
        return format_number(value);
    };
    if value == 0.0 {
        return format!("{:.*}", precision.saturating_sub(1), value);
    }
    let exponent = value.abs().log10().floor() as i64;
    if exponent < -6 || exponent >= precision as i64 {
        exponential(value, precision.saturating_sub(1))
    } else {
        let decimals = (precision as i64).saturating_sub(1).saturating_sub(exponent).max(0);
        format!("{:.*}", decimals as usize, value)
    }
}

fn convert(spec: &mut Spec, specifier: char, value: &Value) -> String {
    match specifier {
        '%' => "%".to_string(),
        's' => {
            let mut text = value.to_string();
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            spec.justify(text, "")
        }
        'c' => {
            let code = to_uint32(value);
            let mut text: String = char::from_u32(code).map(String::from).unwrap_or_default();
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            spec.justify(text, "")
        }
        'b' | 'o' | 'x' | 'X' | 'u' => {
            let number = to_uint32(value);
            let digits = match specifier {
                'b' => format!("{:b}", number),
                'o' => format!("{:o}", number),
                'x' => format!("{:x}", number),
                'X' => format!("{:X}", number),
                _ => number.to_string(),
            };
            let digits = pad_left(digits, spec.precision.unwrap_or(0), '0');
            spec.justify(digits, "")
        }
        'i' | 'd' => {
            let number = value.to_number();
            let number = if number.is_nan() { 0.0 } else { number.trunc() };
            let prefix = if number < 0.0 {
                "-"
            } else if spec.plus {
                "+"
            } else {
                ""
            };
            let digits = pad_left(format_number(number.abs()), spec.precision.unwrap_or(0), '0');
            if spec.left && spec.pad == '0' {
                spec.pad = ' ';
            }
            spec.justify(format!("{}{}", prefix, digits), prefix)
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let number = value.to_number();
            let prefix = if number < 0.0 {
                "-"
            } else if spec.plus {
                "+"
            } else {
                ""
            };
            let magnitude = number.abs();
            let precision = spec.precision.or(match specifier {
                'g' | 'G' => None,
                _ => Some(6),
            });
            let body = match specifier.to_ascii_lowercase() {
                'e' => exponential(magnitude, precision.unwrap_or(6)),
                'f' => format!("{:.*}", precision.unwrap_or(6), magnitude),
                _ => to_precision(magnitude, precision),
            };
            let text = spec.justify(format!("{}{}", prefix, body), prefix);
            if specifier.is_ascii_uppercase() {
                text.to_uppercase()
            } else {
                text
            }
        }
        _ => String::new(),
    }
}

/// PHP `vsprintf`.
pub(crate) fn sprintf(format: &str, args: &[Value]) -> TwigResult<String> {
    let mut output = String::with_capacity(format.len());
    let mut last = 0;
    let mut next_arg = 0_usize;
    for captures in SPRINTF.captures_iter(format) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        output.push_str(format.get(last..whole.start()).unwrap_or_default());
        last = whole.end();
        if whole.as_str() == "%%" {
            output.push('%');
            continue;
        }
        output.push_str(&conversion(&captures, args, &mut next_arg)?);
    }
    output.push_str(format.get(last..).unwrap_or_default());
    Ok(output)
}

fn conversion(captures: &Captures<'_>, args: &[Value], next_arg: &mut usize) -> TwigResult<String> {
    let text = |i: usize| captures.get(i).map(|m| m.as_str());
    let mut spec = Spec::parse(text(2).unwrap_or_default(), text(3), text(4));
    let specifier = text(5).and_then(|s| s.chars().next()).unwrap_or('s');
    if spec.precision.is_none() {
        spec.precision = match specifier {
            'd' => Some(0),
            'f' | 'F' | 'e' | 'E' => Some(6),
            _ => None,
        };
    }

    let value = match text(1) {
        Some(index) => {
            let index: usize = index.parse().unwrap_or(0);
            if index == 0 {
                return Err(TwigError::runtime(
                    "Argument number must be greater than zero",
                ));
            }
            if index > args.len() {
                return Err(TwigError::runtime("Too few arguments"));
            }
            args.get(index.saturating_sub(1)).cloned().unwrap_or_default()
        }
        None => {
            let value = args.get(*next_arg).cloned().unwrap_or_default();
            *next_arg = next_arg.saturating_add(1);
            value
        }
    };
    Ok(convert(&mut spec, specifier, &value))
}

/// PHP `strip_tags`. `allowed` lists tags to keep, e.g. `<b><i>`.
pub(crate) fn strip_tags(input: &str, allowed: &str) -> String {
    let allowed_lower = allowed.to_lowercase();
    let allowed: String = ALLOWED_TAG
        .find_iter(&allowed_lower)
        .map(|m| m.as_str())
        .collect();

    let mut after = input.to_string();
    loop {
        let before = after;
        let without_comments = COMMENT_OR_PHP.replace_all(&before, "");
        after = TAG
            .replace_all(&without_comments, |caps: &Captures<'_>| {
                let name = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                if allowed.contains(&format!("<{}>", name)) {
                    caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()
                } else {
                    String::new()
                }
            })
            .into_owned();
        if before == after {
            return after;
        }
    }
}

/// PHP `number_format`.
pub(crate) fn number_format(
    value: &Value,
    decimals: &Value,
    decimal_point: &str,
    separator: &str,
) -> String {
    let digits: String = value
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | 'E' | 'e' | '.'))
        .collect();
    let number = Value::String(digits).to_number();
    let number = if number.is_finite() { number } else { 0.0 };
    let precision = decimals.to_number();
    let precision = if precision.is_finite() {
        precision.abs() as usize
    } else {
        0
    };

    let rounded = if precision > 0 {
        let factor = 10_f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
        format_number(js_round(number * factor) / factor)
    } else {
        format_number(js_round(number))
    };
    let (integer, fraction) = rounded
        .split_once('.')
        .map_or((rounded.as_str(), ""), |(i, f)| (i, f));

    let (sign, integer) = match integer.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", integer),
    };
    let mut grouped = String::with_capacity(integer.len().saturating_mul(2));
    let count = integer.chars().count();
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && count.saturating_sub(i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(ch);
    }

    let mut fraction = fraction.to_string();
    while fraction.chars().count() < precision {
        fraction.push('0');
    }
    if fraction.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}{}{}", sign, grouped, decimal_point, fraction)
    }
}

/// Loose PHP-style ordering used by `max` and `min`: `1` when `next` is
/// greater than `current`, `-1` when smaller.
pub(crate) fn compare(current: &Value, next: &Value) -> i8 {
    let is_container = |v: &Value| matches!(v, Value::Array(_) | Value::Object(_) | Value::Null);
    if current.strict_equals(next) {
        return 0;
    }
    match (is_container(current), is_container(next)) {
        (true, true) => {
            let current = current.values();
            let next = next.values();
            if next.len() != current.len() {
                return if next.len() > current.len() { 1 } else { -1 };
            }
            current
                .iter()
                .zip(&next)
                .map(|(c, n)| compare(c, n))
                .find(|order| *order != 0)
                .unwrap_or(0)
        }
        (true, false) => -1,
        (false, true) => 1,
        (false, false) => {
            let c = current.to_number();
            let n = next.to_number();
            if n.is_nan() && !c.is_nan() {
                if c == 0.0 {
                    0
                } else if c < 0.0 {
                    1
                } else {
                    -1
                }
            } else if c.is_nan() && !n.is_nan() {
                if n == 0.0 {
                    0
                } else if n > 0.0 {
                    1
                } else {
                    -1
                }
            } else {
                match next.compare(current) {
                    Some(std::cmp::Ordering::Greater) => 1,
                    Some(std::cmp::Ordering::Less) => -1,
                    _ => 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(1000)]
    fn test_sprintf() {
        let format = |f: &str, args: Vec<Value>| sprintf(f, &args).unwrap();
        assert_eq!(format("%01.2f", vec![Value::from(123.1)]), "123.10", "fixed");
        assert_eq!(format("[%10s]", vec![Value::from("monkey")]), "[    monkey]", "width");
        assert_eq!(format("[%'#10s]", vec![Value::from("monkey")]), "[####monkey]", "custom pad");
        assert_eq!(format("%-03s", vec![Value::from("E")]), "E00", "left justify");
        assert_eq!(format("%+010d", vec![Value::from(9)]), "+000000009", "sign and zeros");
        assert_eq!(format("%% %2$d", vec![Value::from(1), Value::from(2)]), "% 2", "positional");
        assert_eq!(format("%x", vec![Value::from(255)]), "ff", "hex");
        assert_eq!(format("%5.1e", vec![Value::from(1234.5)]), "1.2e+3", "exponent");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_sprintf_errors() {
        assert_eq!(
            sprintf("%3$s", &[Value::from("a")]),
            Err(TwigError::runtime("Too few arguments")),
            "missing positional argument"
        );
        assert_eq!(
            sprintf("%0$s", &[Value::from("a")]),
            Err(TwigError::runtime("Argument number must be greater than zero")),
            "zero position"
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_strip_tags() {
        assert_eq!(
            strip_tags("<p>Kevin</p> <br /><b>van</b> <i>Zonneveld</i>", "<i><b>"),
            "Kevin <b>van</b> <i>Zonneveld</i>",
            "keeps allowed tags"
        );
        assert_eq!(strip_tags("1 < 5 5 > 1", ""), "1 < 5 5 > 1", "not tags");
        assert_eq!(
            strip_tags("<i>hello</i> <<foo>script>world<</foo>/script>", ""),
            "hello world",
            "nested bait"
        );
        assert_eq!(strip_tags("a<!-- note -->b", ""), "ab", "comments");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_number_format() {
        let nf = |v: f64, d: f64, p: &str, s: &str| {
            number_format(&Value::from(v), &Value::from(d), p, s)
        };
        assert_eq!(nf(1234.5678, 2.0, ".", ","), "1,234.57", "default separators");
        assert_eq!(nf(1234.5678, 0.0, ".", ","), "1,235", "no decimals");
        assert_eq!(nf(-1234567.0, 1.0, ",", "."), "-1.234.567,0", "custom separators");
        assert_eq!(nf(0.5, 0.0, ".", ","), "1", "half rounds up");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_round() {
        assert_eq!(round(3.6, 0), 4.0, "up");
        assert_eq!(round(3.14159, 2), 3.14, "precision");
        assert_eq!(round(-2.5, 0), -3.0, "half away from zero");
        assert_eq!(round(1_241_757.0, -3), 1_242_000.0, "negative precision");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compare() {
        assert_eq!(compare(&Value::from(1), &Value::from(3)), 1, "greater");
        assert_eq!(compare(&Value::from(0), &Value::from("hello")), 0, "zero and text");
        assert_eq!(compare(&Value::from(-1), &Value::from("hello")), 1, "negative and text");
        assert_eq!(
            compare(&Value::from(vec![2, 4, 8]), &Value::from(vec![2, 5, 7])),
            1,
            "element-wise"
        );
    }
}
