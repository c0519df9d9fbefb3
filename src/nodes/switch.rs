//! Switch node - route the payload to the first matching rule's port.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::condition;
use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};

/// Port taken when no rule matches.
pub const DEFAULT_PORT: &str = "default";

/// Switch node implementation.
pub struct SwitchNode;

impl SwitchNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SwitchNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct Rule {
    output: String,
    #[serde(default = "default_operation")]
    operation: String,
    #[serde(default)]
    value: Value,
}

fn default_operation() -> String {
    "equals".to_string()
}

#[async_trait]
impl Node for SwitchNode {
    fn node_type(&self) -> &str {
        "switch"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Switch",
            self.node_type(),
            NodeGroup::Logic,
            "Route data based on switch conditions",
        )
        .with_outputs(&[DEFAULT_PORT])
        .with_property(PropertyDefinition::new("value", "Value to Match", "string").required())
        .with_property(
            PropertyDefinition::new("rules", "Rules", "collection")
                .with_options(condition::OPERATORS)
                .with_default(Value::Array(Vec::new())),
        )
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: SwitchConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid switch config: {}", e)))?;

        let port = config
            .rules
            .iter()
            .find(|rule| condition::evaluate(&config.value, &rule.operation, &rule.value))
            .map(|rule| rule.output.as_str())
            .unwrap_or(DEFAULT_PORT);

        tracing::debug!(port, "Switch matched");
        Ok(NodeOutput::branch(port, input.clone()))
    }
}
