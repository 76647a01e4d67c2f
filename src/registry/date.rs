//! PHP `date` formatting and `strtotime` parsing over UTC timestamps.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use regex::Regex;

use crate::error::{TwigError, TwigResult};
use crate::value::Value;

const DAY_STEMS: [&str; 7] = ["Sun", "Mon", "Tues", "Wednes", "Thurs", "Fri", "Satur"];
const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{1,4})([\-\./:])(\d{1,2})([\-\./:])(\d{1,4})(?:\s(\d{1,2}):(\d{2})?:?(\d{2})?)?(?:\s([a-z]+)?)?$",
    )
    .expect("numeric date pattern is valid")
});

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    let times = "(years?|months?|weeks?|days?|hours?|minutes?|min|seconds?|sec\
                 |sunday|sun\\.?|monday|mon\\.?|tuesday|tue\\.?|wednesday|wed\\.?\
                 |thursday|thu\\.?|friday|fri\\.?|saturday|sat\\.?)";
    Regex::new(&format!(
        r"(?i)([+-]?\d+\s{times}|(last|next)\s{times})(\sago)?"
    ))
    .expect("relative time pattern is valid")
});

static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("whitespace pattern is valid"));

/// Converts a value to a date the way the `date` function does: empty
/// values mean now, numbers and digit strings are Unix seconds, other
/// strings go through [`strtotime`].
pub(crate) fn to_date(value: &Value) -> TwigResult<DateTime<Utc>> {
    match value {
        Value::Undefined | Value::Null => Ok(Utc::now()),
        Value::Date(date) => Ok(*date),
        Value::Number(seconds) => from_seconds(*seconds, value),
        Value::String(_) | Value::Markup(_) => {
            let text = value.as_str().unwrap_or_default();
            if text.is_empty() {
                return Ok(Utc::now());
            }
            if text.chars().all(|c| c.is_ascii_digit()) {
                return from_seconds(value.to_number(), value);
            }
            strtotime(text, None)
                .ok_or_else(|| unparsable(value))
                .and_then(|seconds| from_seconds(seconds, value))
        }
        Value::Bool(_)
        | Value::Array(_)
        | Value::Object(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::Template(_)
        | Value::Promise(_) => Err(unparsable(value)),
    }
}

fn unparsable(value: &Value) -> TwigError {
    TwigError::runtime(format!("Unable to parse date {}", value))
}

pub(crate) fn from_seconds(seconds: f64, source: &Value) -> TwigResult<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(unparsable(source));
    }
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64).ok_or_else(|| unparsable(source))
}

fn seconds_of(date: &DateTime<Utc>) -> f64 {
    date.timestamp_millis() as f64 / 1000.0
}

fn pad<T: ToString>(value: T, width: usize) -> String {
    let text = value.to_string();
    format!("{:0>width$}", text, width = width)
}

/// Formats `date` with a PHP `date()` format string. A backslash makes the
/// next character literal.
pub(crate) fn format(format: &str, date: &DateTime<Utc>) -> String {
    let mut output = String::with_capacity(format.len().saturating_mul(2));
    let mut chars = format.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(literal) = chars.next() {
                output.push(literal);
            }
            continue;
        }
        match format_char(ch, date) {
            Some(text) => output.push_str(&text),
            None => output.push(ch),
        }
    }
    output
}

fn day_name(date: &DateTime<Utc>) -> String {
    let stem = DAY_STEMS
        .get(date.weekday().num_days_from_sunday() as usize)
        .copied()
        .unwrap_or_default();
    format!("{}day", stem)
}

fn month_name(date: &DateTime<Utc>) -> &'static str {
    MONTHS.get(date.month0() as usize).copied().unwrap_or_default()
}

fn format_char(ch: char, date: &DateTime<Utc>) -> Option<String> {
    let text = match ch {
        'd' => pad(date.day(), 2),
        'D' => day_name(date).chars().take(3).collect(),
        'j' => date.day().to_string(),
        'l' => day_name(date),
        'N' => date.weekday().number_from_monday().to_string(),
        'S' => {
            let day = date.day();
            match (day % 10, day % 100 / 10) {
                (_, 1) => "th",
                (1, _) => "st",
                (2, _) => "nd",
                (3, _) => "rd",
                _ => "th",
            }
            .to_string()
        }
        'w' => date.weekday().num_days_from_sunday().to_string(),
        'z' => date.ordinal0().to_string(),
        'W' => pad(date.iso_week().week(), 2),
        'F' => month_name(date).to_string(),
        'm' => pad(date.month(), 2),
        'M' => month_name(date).chars().take(3).collect(),
        'n' => date.month().to_string(),
        't' => days_in_month(date.year(), date.month()).to_string(),
        'L' => u8::from(NaiveDate::from_ymd_opt(date.year(), 2, 29).is_some()).to_string(),
        'o' => date.iso_week().year().to_string(),
        'Y' => date.year().to_string(),
        'y' => pad(date.year().rem_euclid(100), 2),
        'a' => if date.hour() > 11 { "pm" } else { "am" }.to_string(),
        'A' => if date.hour() > 11 { "PM" } else { "AM" }.to_string(),
        'B' => {
            let seconds = date.num_seconds_from_midnight().saturating_add(3600);
            pad((f64::from(seconds) / 86.4).floor() as u32 % 1000, 3)
        }
        'g' => twelve_hour(date).to_string(),
        'G' => date.hour().to_string(),
        'h' => pad(twelve_hour(date), 2),
        'H' => pad(date.hour(), 2),
        'i' => pad(date.minute(), 2),
        's' => pad(date.second(), 2),
        'u' => pad(date.timestamp_subsec_millis().saturating_mul(1000), 6),
        'e' | 'T' => "UTC".to_string(),
        'I' | 'Z' => "0".to_string(),
        'O' => "+0000".to_string(),
        'P' => "+00:00".to_string(),
        'c' => format("Y-m-d\\TH:i:sP", date),
        'r' => format("D, d M Y H:i:s O", date),
        'U' => date.timestamp().to_string(),
        _ => return None,
    };
    Some(text)
}

fn twelve_hour(date: &DateTime<Utc>) -> u32 {
    match date.hour() % 12 {
        0 => 12,
        hour => hour,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year.saturating_add(1), 1)
    } else {
        (year, month.saturating_add(1))
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// Builds a date like JavaScript's `new Date(y, m, d, h, i, s)`: overflowing
/// months, days and times roll into the next unit.
fn rolled(year: i64, month0: i64, day: i64, hour: i64, minute: i64, second: i64) -> Option<DateTime<Utc>> {
    let year = year.saturating_add(month0.div_euclid(12));
    let month = month0.rem_euclid(12).saturating_add(1);
    let first = NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        1,
    )?;
    let start = first.and_hms_opt(0, 0, 0)?;
    let offset = Duration::try_days(day.saturating_sub(1))?
        .checked_add(&Duration::try_hours(hour)?)?
        .checked_add(&Duration::try_minutes(minute)?)?
        .checked_add(&Duration::try_seconds(second)?)?;
    Some(Utc.from_utc_datetime(&start.checked_add_signed(offset)?))
}

fn parse_number(text: Option<&str>) -> i64 {
    text.and_then(|t| t.parse().ok()).unwrap_or(0)
}

fn numeric_date(text: &str) -> Option<Option<f64>> {
    let caps = NUMERIC_DATE.captures(text)?;
    let part = |i: usize| caps.get(i).map(|m| m.as_str());
    if part(2) != part(4) {
        return None;
    }
    let first = parse_number(part(1));
    let middle = parse_number(part(3));
    let last = parse_number(part(5));
    let hour = parse_number(part(6));
    let minute = parse_number(part(7));
    let second = parse_number(part(8));
    let separator = part(2).unwrap_or_default();
    let at = |year: i64, month: i64, day: i64| {
        rolled(year, month.saturating_sub(1), day, hour, minute, second).map(|d| seconds_of(&d))
    };
    let today = || {
        let now = Utc::now();
        (i64::from(now.year()), i64::from(now.month()), i64::from(now.day()))
    };

    let result = if first > 1901 {
        match separator {
            "-" | "/" if middle <= 12 && last <= 31 => at(first, middle, last),
            _ => None,
        }
    } else if last > 1901 {
        match separator {
            "-" | "." if middle <= 12 && first <= 31 => at(last, middle, first),
            "/" if first <= 12 && middle <= 31 => at(last, first, middle),
            _ => None,
        }
    } else {
        match separator {
            "-" if middle <= 12 && last <= 31 && !(first < 70 && first > 38) => {
                let year = if first <= 38 { first.saturating_add(2000) } else { first };
                at(year, middle, last)
            }
            "." if last >= 70 && middle <= 12 && first <= 31 => at(last, middle, first),
            "." if last < 60 && part(6).is_none() && first <= 23 && middle <= 59 => {
                let (year, month, day) = today();
                rolled(year, month.saturating_sub(1), day, first, middle, last)
                    .map(|d| seconds_of(&d))
            }
            "/" if first <= 12 && middle <= 31 && !(last < 70 && last > 38) => {
                let year = if last <= 38 { last.saturating_add(2000) } else { last };
                at(year, first, middle)
            }
            ":" if first <= 23 && middle <= 59 && last <= 59 => {
                let (year, month, day) = today();
                rolled(year, month.saturating_sub(1), day, first, middle, last)
                    .map(|d| seconds_of(&d))
            }
            _ => None,
        }
    };
    Some(result)
}

fn absolute_date(text: &str) -> Option<f64> {
    let upper = text.to_uppercase();
    if let Ok(date) = DateTime::parse_from_rfc3339(&upper) {
        return Some(date.timestamp() as f64);
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.timestamp() as f64);
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(&upper, pattern) {
            return Some(date.and_utc().timestamp() as f64);
        }
    }
    None
}

fn weekday_index(range: &str) -> Option<i64> {
    match range {
        "sun" => Some(0),
        "mon" => Some(1),
        "tue" => Some(2),
        "wed" => Some(3),
        "thu" => Some(4),
        "fri" => Some(5),
        "sat" => Some(6),
        _ => None,
    }
}

fn shift(date: DateTime<Utc>, phrase: &str) -> Option<DateTime<Utc>> {
    let mut words = phrase.split(' ');
    let kind = words.next()?;
    let unit = words.next()?;
    let ago = words.next() == Some("ago");
    let range: String = unit.chars().take(3).collect();
    let numeric = kind.chars().any(|c| c.is_ascii_digit());
    let mut amount: i64 = if kind == "last" { -1 } else { 1 };
    if ago {
        amount = amount.saturating_neg();
    }
    if numeric {
        amount = amount.saturating_mul(kind.trim_start_matches('+').parse::<i64>().ok()?);
    }

    let is_monday = matches!(unit, "monday" | "mon" | "mon.");
    let year = i64::from(date.year());
    let month = i64::from(date.month0());
    let day = i64::from(date.day());
    let (hour, minute, second) = (
        i64::from(date.hour()),
        i64::from(date.minute()),
        i64::from(date.second()),
    );
    let millis = Duration::try_milliseconds(i64::from(date.timestamp_subsec_millis()))?;
    let step = match range.as_str() {
        "yea" => {
            return rolled(year.saturating_add(amount), month, day, hour, minute, second)?
                .checked_add_signed(millis);
        }
        "mon" if !is_monday => {
            return rolled(year, month.saturating_add(amount), day, hour, minute, second)?
                .checked_add_signed(millis);
        }
        "day" => Duration::try_days(amount)?,
        "hou" => Duration::try_hours(amount)?,
        "min" => Duration::try_minutes(amount)?,
        "sec" => Duration::try_seconds(amount)?,
        "wee" => Duration::try_days(amount.saturating_mul(7))?,
        _ if kind == "next" || kind == "last" => {
            let Some(target) = weekday_index(&range) else {
                return Some(date);
            };
            let current = i64::from(date.weekday().num_days_from_sunday());
            let mut diff = target.saturating_sub(current);
            if diff == 0 {
                diff = amount.saturating_mul(7);
            } else if diff > 0 && kind == "last" {
                diff = diff.saturating_sub(7);
            } else if diff < 0 && kind == "next" {
                diff = diff.saturating_add(7);
            }
            Duration::try_days(diff)?
        }
        _ if numeric => return Some(date),
        _ => return None,
    };
    date.checked_add_signed(step)
}

/// PHP `strtotime`: Unix seconds for `text`, relative phrases applied to
/// `now` (seconds) or the current time.
pub(crate) fn strtotime(text: &str, now: Option<f64>) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let text = SPACES
        .replace_all(text, " ")
        .replace(['\t', '\r', '\n'], "")
        .to_lowercase();

    if let Some(result) = numeric_date(&text) {
        return result;
    }
    if text == "now" {
        return Some(match now {
            Some(now) if !now.is_nan() => now.trunc(),
            _ => Utc::now().timestamp() as f64,
        });
    }
    if let Some(seconds) = absolute_date(&text) {
        return Some(seconds);
    }

    let mut date = match now {
        Some(now) if now != 0.0 => from_seconds(now, &Value::Number(now)).ok()?,
        _ => Utc::now(),
    };
    let mut matched = false;
    for phrase in RELATIVE.find_iter(&text) {
        matched = true;
        date = shift(date, phrase.as_str())?;
    }
    matched.then(|| seconds_of(&date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format() {
        let d = date("2024-03-05T14:07:09Z");
        assert_eq!(format("Y-m-d H:i:s", &d), "2024-03-05 14:07:09", "numeric parts");
        assert_eq!(format("F j, Y", &d), "March 5, 2024", "names");
        assert_eq!(format("D l N w", &d), "Tue Tuesday 2 2", "weekday");
        assert_eq!(format("jS g:i a", &d), "5th 2:07 pm", "ordinal and 12 hour");
        assert_eq!(format("\\Y\\e\\s Y", &d), "Yes 2024", "escapes");
        assert_eq!(format("t L", &d), "31 1", "days in month and leap year");
        assert_eq!(format("U", &d), "1709647629", "unix seconds");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ordinal_suffixes() {
        let suffix = |day: &str| format("S", &date(&format!("2024-01-{}T00:00:00Z", day)));
        assert_eq!(suffix("01"), "st", "1st");
        assert_eq!(suffix("02"), "nd", "2nd");
        assert_eq!(suffix("11"), "th", "11th");
        assert_eq!(suffix("22"), "nd", "22nd");
        assert_eq!(suffix("13"), "th", "13th");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strtotime_absolute() {
        assert_eq!(strtotime("2024-03-05", None), Some(1_709_596_800.0), "ymd");
        assert_eq!(
            strtotime("2024-03-05 10:00:00", None),
            Some(1_709_632_800.0),
            "ymd with time"
        );
        assert_eq!(strtotime("05.03.2024", None), Some(1_709_596_800.0), "dmy");
        assert_eq!(strtotime("03/05/2024", None), Some(1_709_596_800.0), "mdy");
        assert_eq!(
            strtotime("2024-03-05T10:00:00Z", None),
            Some(1_709_632_800.0),
            "iso 8601"
        );
        assert_eq!(strtotime("2024-13-05", None), None, "bad month");
        assert_eq!(strtotime("not a date", None), None, "garbage");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strtotime_relative() {
        let base = 1_709_596_800.0; // 2024-03-05, a Tuesday
        assert_eq!(strtotime("+1 day", Some(base)), Some(base + 86_400.0), "day");
        assert_eq!(strtotime("2 days ago", Some(base)), Some(base - 172_800.0), "ago");
        assert_eq!(
            strtotime("+1 week 2 hours", Some(base)),
            Some(base + 604_800.0 + 7_200.0),
            "combined"
        );
        assert_eq!(
            strtotime("+1 month", Some(base)),
            Some(1_712_275_200.0),
            "month"
        );
        assert_eq!(
            strtotime("next friday", Some(base)),
            Some(base + 3.0 * 86_400.0),
            "next weekday"
        );
        assert_eq!(
            strtotime("last monday", Some(base)),
            Some(base - 86_400.0),
            "last weekday"
        );
        assert_eq!(strtotime("now", Some(base)), Some(base), "now");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_to_date() {
        assert_eq!(
            to_date(&Value::from(86_400)).unwrap(),
            date("1970-01-02T00:00:00Z"),
            "seconds"
        );
        assert_eq!(
            to_date(&Value::from("86400")).unwrap(),
            date("1970-01-02T00:00:00Z"),
            "digit string"
        );
        assert!(to_date(&Value::from(true)).is_err(), "booleans are rejected");
    }
}
