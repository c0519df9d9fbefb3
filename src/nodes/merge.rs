//! Merge node - combine the entries of the incoming payload.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};
use crate::expression::stringify;

/// Merge node implementation.
pub struct MergeNode;

impl MergeNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MergeConfig {
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "append".to_string()
}

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        "merge"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Merge",
            self.node_type(),
            NodeGroup::Logic,
            "Merge data from multiple inputs",
        )
        .with_property(
            PropertyDefinition::new("mode", "Mode", "options")
                .with_options(&[
                    ("Append", "append"),
                    ("Combine", "combine"),
                    ("Intersect", "intersect"),
                ])
                .with_default(Value::String("append".into())),
        )
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: MergeConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid merge config: {}", e)))?;

        let entries = entries(input);
        if entries.is_empty() && !input.is_object() && !input.is_array() {
            return Ok(NodeOutput::Data(input.clone()));
        }

        let merged = match config.mode.as_str() {
            "append" => append(&entries),
            "combine" => combine(&entries),
            "intersect" => intersect(&entries).unwrap_or_else(|| input.clone()),
            _ => input.clone(),
        };
        Ok(NodeOutput::Data(merged))
    }
}

/// Keyed entries of an object or array payload.
fn entries(input: &Value) -> Vec<(String, &Value)> {
    match input {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn append(entries: &[(String, &Value)]) -> Value {
    let mut result = Vec::new();
    for (_, value) in entries {
        match value {
            Value::Array(items) => result.extend(items.iter().cloned()),
            other => result.push((*other).clone()),
        }
    }
    Value::Array(result)
}

fn combine(entries: &[(String, &Value)]) -> Value {
    let mut result = Map::new();
    for (key, value) in entries {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    result.insert(k.clone(), v.clone());
                }
            }
            other => {
                result.insert(key.clone(), (*other).clone());
            }
        }
    }
    Value::Object(result)
}

/// Elements of the first array present in every other array.
///
/// `None` when no entry is an array.
fn intersect(entries: &[(String, &Value)]) -> Option<Value> {
    let mut arrays = entries.iter().filter_map(|(_, v)| v.as_array());
    let first = arrays.next()?;

    let others: Vec<Vec<String>> = arrays
        .map(|items| items.iter().map(stringify).collect())
        .collect();

    let result = first
        .iter()
        .filter(|item| {
            let key = stringify(item);
            others.iter().all(|other| other.contains(&key))
        })
        .cloned()
        .collect();
    Some(Value::Array(result))
}
