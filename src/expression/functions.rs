//! Builtin expression functions.
//!
//! Every function receives already-evaluated arguments and never fails:
//! missing or mistyped arguments degrade to empty strings / zero.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{json, Value};

use super::stringify;

/// Callable registered in the function table.
pub type ExpressionFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Build the default function table.
pub fn builtin_functions() -> HashMap<String, ExpressionFn> {
    let mut table: HashMap<String, ExpressionFn> = HashMap::new();

    table.insert("now".into(), Arc::new(|_: &[Value]| now()));
    table.insert("today".into(), Arc::new(|_: &[Value]| today()));
    table.insert(
        "uuid".into(),
        Arc::new(|_: &[Value]| json!(uuid::Uuid::new_v4().to_string())),
    );
    table.insert("random".into(), Arc::new(random));
    table.insert(
        "upper".into(),
        Arc::new(|args: &[Value]| json!(arg_str(args, 0).to_uppercase())),
    );
    table.insert(
        "lower".into(),
        Arc::new(|args: &[Value]| json!(arg_str(args, 0).to_lowercase())),
    );
    table.insert("length".into(), Arc::new(length));
    table.insert(
        "trim".into(),
        Arc::new(|args: &[Value]| json!(arg_str(args, 0).trim())),
    );
    table.insert("replace".into(), Arc::new(replace));
    table.insert("split".into(), Arc::new(split));
    table.insert("join".into(), Arc::new(join));

    table
}

fn arg_str(args: &[Value], index: usize) -> String {
    args.get(index).map(stringify).unwrap_or_default()
}

fn arg_i64(args: &[Value], index: usize) -> Option<i64> {
    match args.get(index)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

fn now() -> Value {
    json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false))
}

fn today() -> Value {
    json!(Utc::now().format("%Y-%m-%d").to_string())
}

fn random(args: &[Value]) -> Value {
    let min = arg_i64(args, 0).unwrap_or(0);
    let max = arg_i64(args, 1).unwrap_or(100);
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    json!(rand::thread_rng().gen_range(low..=high))
}

fn length(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Array(items)) => json!(items.len()),
        Some(Value::Object(map)) => json!(map.len()),
        Some(other) => json!(stringify(other).chars().count()),
        None => json!(0),
    }
}

fn replace(args: &[Value]) -> Value {
    let subject = arg_str(args, 0);
    let search = arg_str(args, 1);
    if search.is_empty() {
        return json!(subject);
    }
    json!(subject.replace(&search, &arg_str(args, 2)))
}

fn split(args: &[Value]) -> Value {
    let subject = arg_str(args, 0);
    let delimiter = arg_str(args, 1);
    if delimiter.is_empty() {
        return json!([subject]);
    }
    Value::Array(
        subject
            .split(delimiter.as_str())
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}

fn join(args: &[Value]) -> Value {
    let glue = arg_str(args, 1);
    match args.first() {
        Some(Value::Array(items)) => {
            json!(items.iter().map(stringify).collect::<Vec<_>>().join(&glue))
        }
        Some(other) => json!(stringify(other)),
        None => json!(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        let table = builtin_functions();
        (table.get(name).unwrap())(args)
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", &[json!("abc")]), json!("ABC"));
        assert_eq!(call("lower", &[json!("AbC")]), json!("abc"));
        assert_eq!(call("trim", &[json!("  x ")]), json!("x"));
        assert_eq!(call("length", &[json!("héllo")]), json!(5));
        assert_eq!(call("length", &[json!([1, 2, 3])]), json!(3));
        assert_eq!(
            call("replace", &[json!("a-b-c"), json!("-"), json!("+")]),
            json!("a+b+c")
        );
    }

    #[test]
    fn test_split_and_join() {
        let parts = call("split", &[json!("a,b"), json!(",")]);
        assert_eq!(parts, json!(["a", "b"]));
        assert_eq!(call("join", &[parts, json!("|")]), json!("a|b"));
    }

    #[test]
    fn test_random_bounds() {
        for _ in 0..50 {
            let v = call("random", &[json!(5), json!(7)]).as_i64().unwrap();
            assert!((5..=7).contains(&v));
        }
        let v = call("random", &[]).as_i64().unwrap();
        assert!((0..=100).contains(&v));
    }

    #[test]
    fn test_today_and_now_shapes() {
        let today = call("today", &[]);
        assert_eq!(today.as_str().unwrap().len(), 10);
        let now = call("now", &[]);
        assert!(chrono::DateTime::parse_from_rfc3339(now.as_str().unwrap()).is_ok());
        let id = call("uuid", &[]);
        assert!(uuid::Uuid::parse_str(id.as_str().unwrap()).is_ok());
    }
}
