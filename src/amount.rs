//! Lenient number handling for ledger fields.
//!
//! Field values are kept as the strings the user typed. These helpers turn
//! them into numbers the way a browser's `parseFloat` would: the longest
//! numeric prefix wins and anything unparseable is simply absent.

use std::sync::LazyLock;

use regex::Regex;

pub const RESULT_PREFIX: &str = "Total: ";

static LEADING_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").unwrap()
});

/// Parses the leading float of `raw`, ignoring leading whitespace and any
/// trailing garbage. `"12abc"` is 12, `"abc"` is `None`.
pub fn parse_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim_start();
    let found = LEADING_FLOAT.find(trimmed)?;
    found.as_str().parse::<f64>().ok()
}

/// Parses a single-valued optional field, treating blanks and garbage as 0.
pub fn parse_or_zero(raw: &str) -> f64 {
    parse_float(raw).unwrap_or(0.0)
}

/// Every numeric token of a `+`-joined expression, non-numeric tokens dropped.
pub fn additive_tokens(raw: &str) -> Vec<f64> {
    raw.split('+').filter_map(|token| parse_float(token.trim())).collect()
}

/// Sum of a `+`-joined expression such as `"10+5+ 2.5"`.
pub fn sum_additive(raw: &str) -> f64 {
    additive_tokens(raw).iter().sum()
}

/// Formats with one decimal, rounding exact halves away from zero.
///
/// Only values of the form `odd / 4` sit exactly on a half at one decimal;
/// everything else is already rounded correctly by the standard formatter.
pub fn to_fixed1(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    // normalise -0.0
    let value = if value == 0.0 { 0.0 } else { value };

    let magnitude = value.abs();
    let quadrupled = magnitude * 4.0;
    if quadrupled.fract() == 0.0 && quadrupled % 2.0 == 1.0 {
        let rounded = (magnitude * 10.0).round() / 10.0;
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{sign}{rounded:.1}");
    }
    format!("{value:.1}")
}

/// Shortest round-trip rendering, `15.0` prints as `"15"`.
pub fn number_to_string(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value}")
}

pub fn format_result(value: f64) -> String {
    format!("{RESULT_PREFIX}{}", to_fixed1(value))
}

/// Numeric part of a `"Total: x"` result string.
pub fn parse_result(result: &str) -> Option<f64> {
    parse_float(result.strip_prefix(RESULT_PREFIX).unwrap_or(result))
}

/// Display form used by the share summary: expressions stay verbatim,
/// single values get one decimal.
pub fn format_value(raw: &str) -> String {
    if raw.contains('+') {
        return raw.trim().to_string();
    }
    match parse_float(raw) {
        Some(value) => to_fixed1(value),
        None => "0".to_string(),
    }
}
