//! Code node - run a user script with Rhai.

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};

/// Upper bound on script operations, so a runaway loop fails the node.
const MAX_OPERATIONS: u64 = 1_000_000;

/// Code node using Rhai scripts.
pub struct CodeNode;

impl CodeNode {
    pub fn new() -> Self {
        Self
    }

    /// Create a configured Rhai engine.
    fn create_engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);

        engine.register_fn("to_json", |v: Dynamic| -> String {
            serde_json::to_string(&dynamic_to_json(v)).unwrap_or_default()
        });

        engine.register_fn("from_json", |s: &str| -> Dynamic {
            serde_json::from_str::<Value>(s)
                .map(json_to_dynamic)
                .unwrap_or(Dynamic::UNIT)
        });

        engine
    }
}

impl Default for CodeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert rhai::Dynamic to serde_json::Value
fn dynamic_to_json(v: Dynamic) -> Value {
    if v.is_unit() {
        Value::Null
    } else if v.is_bool() {
        Value::Bool(v.as_bool().unwrap_or(false))
    } else if v.is_int() {
        json!(v.as_int().unwrap_or(0))
    } else if v.is_float() {
        json!(v.as_float().unwrap_or(0.0))
    } else if v.is_string() {
        Value::String(v.into_string().unwrap_or_default())
    } else if v.is_array() {
        match v.into_array() {
            Ok(arr) => Value::Array(arr.into_iter().map(dynamic_to_json).collect()),
            Err(_) => Value::Null,
        }
    } else if v.is_map() {
        match v.try_cast::<rhai::Map>() {
            Some(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            ),
            None => Value::Null,
        }
    } else {
        Value::String(v.to_string())
    }
}

/// Convert serde_json::Value to rhai::Dynamic
fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Collections pass through; anything else is wrapped as `{result}`.
fn wrap_result(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}

#[derive(Debug, Deserialize)]
struct CodeConfig {
    code: String,
    #[serde(default = "default_mode")]
    mode: String, // "run_once" | "each_item"
}

fn default_mode() -> String {
    "run_once".to_string()
}

#[async_trait]
impl Node for CodeNode {
    fn node_type(&self) -> &str {
        "code"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Code",
            self.node_type(),
            NodeGroup::Transform,
            "Run a Rhai script against the payload",
        )
        .with_property(
            PropertyDefinition::new("mode", "Mode", "options")
                .with_options(&[
                    ("Run Once for All Items", "run_once"),
                    ("Run Once for Each Item", "each_item"),
                ])
                .with_default(json!("run_once")),
        )
        .with_property(
            PropertyDefinition::new("code", "Code", "code")
                .required()
                .with_default(json!("items")),
        )
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: CodeConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid code config: {}", e)))?;

        debug!(mode = %config.mode, "Running code node");
        let engine = Self::create_engine();

        if config.mode == "each_item" {
            let items: Vec<Value> = match input {
                Value::Array(items) => items.clone(),
                Value::Object(map) => map.values().cloned().collect(),
                other => vec![other.clone()],
            };

            let results = items
                .into_iter()
                .map(|item| {
                    let mut scope = Scope::new();
                    scope.push_dynamic("item", json_to_dynamic(item));
                    match engine.eval_with_scope::<Dynamic>(&mut scope, &config.code) {
                        Ok(result) => wrap_result(dynamic_to_json(result)),
                        Err(e) => json!({ "error": e.to_string() }),
                    }
                })
                .collect();
            return Ok(NodeOutput::Data(Value::Array(results)));
        }

        let mut scope = Scope::new();
        scope.push_dynamic("items", json_to_dynamic(input.clone()));
        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, &config.code)
            .map_err(|e| {
                Error::node_with_trace(format!("Script execution error: {}", e), format!("{:?}", e))
            })?;

        Ok(NodeOutput::Data(wrap_result(dynamic_to_json(result))))
    }
}
