//! Set node - assign values at dot paths in the payload.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};
use crate::expression::set_path;

/// Set node implementation.
pub struct SetNode;

impl SetNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SetConfig {
    #[serde(default, alias = "fields")]
    values: Vec<Assignment>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    name: String,
    #[serde(default, rename = "setTo", alias = "value")]
    set_to: Value,
}

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "set"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Set",
            self.node_type(),
            NodeGroup::Transform,
            "Set values on items",
        )
        .with_property(
            PropertyDefinition::new("values", "Values to Set", "collection")
                .with_default(Value::Array(Vec::new())),
        )
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: SetConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid set config: {}", e)))?;

        let mut output = input.clone();
        for assignment in config.values {
            if assignment.name.trim().is_empty() {
                return Err(Error::node("Set node field name cannot be empty"));
            }
            set_path(&mut output, &assignment.name, assignment.set_to);
        }

        Ok(NodeOutput::Data(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_assigns_dot_paths() {
        let params = json!({
            "values": [
                {"name": "new_field", "setTo": "processed_test"},
                {"name": "meta.source.kind", "setTo": 3}
            ]
        });
        let out = SetNode::new()
            .execute(&json!({"original_value": "test"}), &params, &Credentials::new())
            .await
            .unwrap();

        assert_eq!(
            out,
            NodeOutput::Data(json!({
                "original_value": "test",
                "new_field": "processed_test",
                "meta": {"source": {"kind": 3}}
            }))
        );
    }

    #[tokio::test]
    async fn test_set_replaces_scalar_intermediates() {
        let params = json!({"values": [{"name": "a.b", "setTo": 1}]});
        let out = SetNode::new()
            .execute(&json!({"a": "flat"}), &params, &Credentials::new())
            .await
            .unwrap();
        assert_eq!(out.payload(), &json!({"a": {"b": 1}}));
    }

    #[tokio::test]
    async fn test_set_rejects_blank_name() {
        let params = json!({"values": [{"name": " ", "setTo": 1}]});
        let err = SetNode::new()
            .execute(&json!({}), &params, &Credentials::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NODE_EXECUTION_ERROR");
    }
}
