//! Loosely typed condition operators shared by the `if` and `switch` nodes.
//!
//! Comparison follows the conventions of form-driven automation tools rather
//! than strict JSON equality: `"10"` equals `10`, ordering is numeric when
//! both operands look numeric, and string operators work on the textual form
//! of either operand.

use std::cmp::Ordering;

use regex_lite::Regex;
use serde_json::Value;

use crate::expression::{numeric_value, stringify};

/// Supported operators as `(label, id)` pairs.
pub const OPERATORS: &[(&str, &str)] = &[
    ("Equals", "equals"),
    ("Not Equals", "not_equals"),
    ("Contains", "contains"),
    ("Not Contains", "not_contains"),
    ("Starts With", "starts_with"),
    ("Ends With", "ends_with"),
    ("Greater Than", "greater_than"),
    ("Less Than", "less_than"),
    ("Greater or Equal", "greater_or_equal"),
    ("Less or Equal", "less_or_equal"),
    ("Is Empty", "is_empty"),
    ("Is Not Empty", "is_not_empty"),
    ("Regex Match", "regex_match"),
];

/// Evaluate `left <operator> right`. Unknown operators are false.
pub fn evaluate(left: &Value, operator: &str, right: &Value) -> bool {
    match operator {
        "equals" => loose_eq(left, right),
        "not_equals" => !loose_eq(left, right),
        "contains" => stringify(left).contains(&stringify(right)),
        "not_contains" => !stringify(left).contains(&stringify(right)),
        "starts_with" => stringify(left).starts_with(&stringify(right)),
        "ends_with" => stringify(left).ends_with(&stringify(right)),
        "greater_than" => loose_cmp(left, right) == Ordering::Greater,
        "less_than" => loose_cmp(left, right) == Ordering::Less,
        "greater_or_equal" => loose_cmp(left, right) != Ordering::Less,
        "less_or_equal" => loose_cmp(left, right) != Ordering::Greater,
        "is_empty" => is_empty(left),
        "is_not_empty" => !is_empty(left),
        "regex_match" => regex_match(&stringify(right), &stringify(left)),
        other => {
            tracing::warn!(operator = other, "Unknown condition operator");
            false
        }
    }
}

/// Numeric view of a number or numeric-looking string.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => numeric_value(s),
        _ => None,
    }
}

/// Truthiness: null, false, 0, "", "0", and empty collections are falsy.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, other) | (other, Value::Null) => is_empty(other),
        (Value::Bool(_), _) | (_, Value::Bool(_)) => is_empty(left) == is_empty(right),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            left == right
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(l), Some(r)) => l == r,
            _ => stringify(left) == stringify(right),
        },
    }
}

fn loose_cmp(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => stringify(left).cmp(&stringify(right)),
    }
}

/// Match `text` against `pattern`.
///
/// Accepts both bare patterns (`^a+$`) and delimited ones with trailing
/// flags (`/^a+$/i`). Invalid patterns never match.
fn regex_match(pattern: &str, text: &str) -> bool {
    let pattern = translate_delimited(pattern);
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid regex in condition");
            false
        }
    }
}

fn translate_delimited(pattern: &str) -> String {
    let mut chars = pattern.chars();
    let Some(delimiter) = chars.next() else {
        return String::new();
    };
    if !matches!(delimiter, '/' | '#' | '~' | '@' | '!' | '%' | '|') {
        return pattern.to_string();
    }

    let rest = chars.as_str();
    let Some(end) = rest.rfind(delimiter) else {
        return pattern.to_string();
    };

    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return pattern.to_string();
    }
    let inline: String = flags.chars().filter(|c| matches!(c, 'i' | 'm' | 's' | 'x')).collect();
    if inline.is_empty() {
        body.to_string()
    } else {
        format!("(?{}){}", inline, body)
    }
}
