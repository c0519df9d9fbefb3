//! IF node - route the payload to the `true` or `false` port.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::condition;
use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};

/// IF node implementation.
pub struct IfNode;

impl IfNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IfNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct IfConfig {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default = "default_combine")]
    combine_operation: String, // "and" | "or"
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(default)]
    value1: Value,
    operation: String,
    #[serde(default)]
    value2: Value,
}

fn default_combine() -> String {
    "and".to_string()
}

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "if"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "IF",
            self.node_type(),
            NodeGroup::Logic,
            "Split workflow based on conditions",
        )
        .with_outputs(&["true", "false"])
        .with_property(
            PropertyDefinition::new("conditions", "Conditions", "collection")
                .required()
                .with_options(condition::OPERATORS)
                .with_default(Value::Array(Vec::new())),
        )
        .with_property(
            PropertyDefinition::new("combine_operation", "Combine", "options")
                .with_options(&[("AND", "and"), ("OR", "or")])
                .with_default(Value::String("and".into())),
        )
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: IfConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid if config: {}", e)))?;

        let mut results = config
            .conditions
            .iter()
            .map(|c| condition::evaluate(&c.value1, &c.operation, &c.value2));

        // Anything other than "and" combines with OR.
        let passed = if config.combine_operation.eq_ignore_ascii_case("and") {
            results.all(|r| r)
        } else {
            results.any(|r| r)
        };

        tracing::debug!(passed, "IF evaluated");
        let port = if passed { "true" } else { "false" };
        Ok(NodeOutput::branch(port, input.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(input: Value, params: Value) -> NodeOutput {
        IfNode::new()
            .execute(&input, &params, &Credentials::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_if_routes_by_condition() {
        let params = json!({
            "conditions": [{"value1": "15", "operation": "greater_than", "value2": 10}]
        });
        let out = run(json!({"number": 15}), params).await;
        assert_eq!(out, NodeOutput::branch("true", json!({"number": 15})));

        let params = json!({
            "conditions": [{"value1": "5", "operation": "greater_than", "value2": "10"}]
        });
        assert_eq!(run(json!({}), params).await.port(), Some("false"));
    }

    #[tokio::test]
    async fn test_if_combine_operations() {
        let conditions = json!([
            {"value1": "a", "operation": "equals", "value2": "a"},
            {"value1": "a", "operation": "equals", "value2": "b"}
        ]);

        let and = run(json!({}), json!({"conditions": conditions})).await;
        assert_eq!(and.port(), Some("false"));

        let or = run(
            json!({}),
            json!({"conditions": conditions, "combine_operation": "or"}),
        )
        .await;
        assert_eq!(or.port(), Some("true"));
    }

    #[test]
    fn test_if_requires_conditions() {
        let node = IfNode::new();
        assert!(matches!(
            node.validate(&json!({"conditions": []})),
            Err(Error::MissingRequiredParameter(p)) if p == "conditions"
        ));
    }
}
