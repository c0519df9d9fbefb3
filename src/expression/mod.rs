//! Template expression evaluation.
//!
//! Parameter strings may embed `{{ ... }}` spans that are evaluated against
//! the run context:
//!
//! - `{{ $json.path }}` reads from the payload flowing into the node, falling
//!   back to the whole context, then `null`.
//! - `{{ $node["Name"].json.path }}` reads a prior node's recorded output,
//!   matched by display name first and node id second.
//! - `{{ fn(arg, ...) }}` calls a builtin (see [`functions`]).
//! - Anything else evaluates to its own trimmed text.
//!
//! Each span is replaced by the string form of its result.

mod functions;
pub mod path;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;
use serde_json::{Map, Value};

pub use functions::ExpressionFn;
pub use path::{get_path, set_path};

fn span_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.+?)\}\}").expect("valid span regex"))
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)\((.*)\)$").expect("valid call regex"))
}

fn node_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\$node\[["'](.+?)["']\]\.json(?:\.(.+))?$"#).expect("valid node regex")
    })
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^["'](.*)["']$"#).expect("valid quote regex"))
}

/// String form used when a value is spliced into a template.
///
/// Strings are inserted raw, `null` becomes empty, and composite values are
/// JSON-encoded.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Evaluates `{{ }}` templates against a context map.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    functions: HashMap<String, ExpressionFn>,
}

impl ExpressionEvaluator {
    /// Create an evaluator with the builtin function table.
    pub fn new() -> Self {
        Self {
            functions: functions::builtin_functions(),
        }
    }

    /// Register (or replace) a function callable from templates.
    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Replace every `{{ }}` span in `template`.
    ///
    /// A template without spans is returned unchanged.
    pub fn render(&self, template: &str, context: &Value) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        span_regex()
            .replace_all(template, |caps: &regex_lite::Captures<'_>| {
                stringify(&self.evaluate(&caps[1], context))
            })
            .into_owned()
    }

    /// Resolve a single parameter value. Only strings containing `{{` change.
    pub fn resolve(&self, value: &Value, context: &Value) -> Value {
        match value {
            Value::String(s) if s.contains("{{") => Value::String(self.render(s, context)),
            other => other.clone(),
        }
    }

    /// Resolve every string leaf of a nested parameter structure.
    pub fn resolve_parameters(&self, params: &Value, context: &Value) -> Value {
        match params {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_parameters(v, context)))
                    .collect::<Map<String, Value>>(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_parameters(v, context))
                    .collect(),
            ),
            other => self.resolve(other, context),
        }
    }

    /// Evaluate the inside of one `{{ }}` span.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Value {
        let expression = expression.trim();

        if let Some(rest) = expression.strip_prefix("$json") {
            if rest.is_empty() {
                return context.get("json").cloned().unwrap_or(Value::Null);
            }
            if let Some(path) = rest.strip_prefix('.') {
                return resolve_json_path(path, context);
            }
        }

        if expression.starts_with("$node") {
            return resolve_node_reference(expression, context);
        }

        if let Some(caps) = call_regex().captures(expression) {
            if let Some(function) = self.functions.get(&caps[1]) {
                let args = self.parse_arguments(&caps[2], context);
                return function(&args);
            }
        }

        Value::String(expression.to_string())
    }

    fn parse_arguments(&self, args: &str, context: &Value) -> Vec<Value> {
        if args.trim().is_empty() {
            return Vec::new();
        }

        args.split(',')
            .map(|arg| {
                let arg = arg.trim();
                if arg.len() >= 2 {
                    if let Some(caps) = quoted_regex().captures(arg) {
                        return Value::String(caps[1].to_string());
                    }
                }
                if let Some(number) = parse_number(arg) {
                    return number;
                }
                self.evaluate(arg, context)
            })
            .collect()
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    numeric_value(s)
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Parse a numeric-looking string (`"10"`, `" 2.5 "`, `"1e3"`).
///
/// Rejects the textual forms `f64::from_str` accepts but that nobody means as
/// a number, such as `"inf"` or `"NaN"`.
pub(crate) fn numeric_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty()
        || !s.chars().any(|c| c.is_ascii_digit())
        || !s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn resolve_json_path(path: &str, context: &Value) -> Value {
    if let Some(json) = context.get("json") {
        if json.is_object() || json.is_array() {
            if let Some(found) = get_path(json, path).filter(|v| !v.is_null()) {
                return found.clone();
            }
        }
    }

    get_path(context, path).cloned().unwrap_or(Value::Null)
}

fn resolve_node_reference(expression: &str, context: &Value) -> Value {
    let Some(caps) = node_ref_regex().captures(expression) else {
        return Value::Null;
    };
    let name = &caps[1];
    let field = caps.get(2).map(|m| m.as_str()).unwrap_or("");

    let Some(nodes) = context.get("nodes").and_then(Value::as_object) else {
        return Value::Null;
    };

    let entry = nodes
        .values()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
        .or_else(|| nodes.get(name));

    entry
        .and_then(|entry| entry.get("json"))
        .and_then(|json| get_path(json, field))
        .cloned()
        .unwrap_or(Value::Null)
}
