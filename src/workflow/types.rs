//! Workflow graph definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A workflow graph: nodes plus directed connections between named ports.
///
/// # Example YAML
///
/// ```yaml
/// name: order-followup
/// nodes:
///   - id: start
///     type: manual_trigger
///   - id: check
///     type: if
///     parameters:
///       conditions:
///         - value1: "{{ $json.total }}"
///           operation: greater_than
///           value2: 100
///   - id: notify
///     type: email
///     credential_ref: smtp
///     parameters:
///       to: "{{ $json.email }}"
///       subject: Thanks!
///       body: Your order is on its way.
/// connections:
///   - { source: start, target: check }
///   - { source: check, target: notify, source_output: "true" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Stable identifier (defaults to the name)
    #[serde(default)]
    pub id: String,

    /// Workflow name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Nodes in declaration order
    pub nodes: Vec<WorkflowNode>,

    /// Directed edges
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn default_active() -> bool {
    true
}

impl WorkflowGraph {
    /// Find a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique within the graph
    pub id: String,

    /// Registered node type id (e.g. "http_request", "if")
    #[serde(rename = "type")]
    pub node_type: String,

    /// Display name, used by `$node["Name"]` references
    #[serde(default)]
    pub name: Option<String>,

    /// Raw parameters; string leaves may contain `{{ }}` templates
    #[serde(default = "empty_parameters")]
    pub parameters: Value,

    /// Reference handed to the credential provider
    #[serde(default, alias = "credentials", alias = "credentialRef")]
    pub credential_ref: Option<String>,
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

impl WorkflowNode {
    /// Name shown in records; falls back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether traversal may start at this node.
    pub fn is_trigger(&self) -> bool {
        self.node_type.contains("trigger") || self.node_type.contains("webhook")
    }
}

/// Directed edge from a node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(alias = "sourceNodeId", alias = "source_node_id")]
    pub source: String,

    #[serde(alias = "targetNodeId", alias = "target_node_id")]
    pub target: String,

    #[serde(default = "default_port", alias = "sourceOutput")]
    pub source_output: String,

    #[serde(default = "default_port", alias = "targetInput")]
    pub target_input: String,
}

/// Name of the default port.
pub const MAIN_PORT: &str = "main";

fn default_port() -> String {
    MAIN_PORT.to_string()
}

impl Connection {
    /// Connection between the main ports of two nodes.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            source_output: default_port(),
            target_input: default_port(),
        }
    }

    /// Connection leaving a named output port.
    pub fn from_port(source: &str, port: &str, target: &str) -> Self {
        Self {
            source_output: port.to_string(),
            ..Self::new(source, target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_detection_by_type() {
        let node = |t: &str| WorkflowNode {
            id: "n".into(),
            node_type: t.into(),
            name: None,
            parameters: empty_parameters(),
            credential_ref: None,
        };
        assert!(node("manual_trigger").is_trigger());
        assert!(node("webhook_trigger").is_trigger());
        assert!(node("webhook").is_trigger());
        assert!(!node("http_request").is_trigger());
    }

    #[test]
    fn test_connection_defaults() {
        let conn: Connection =
            serde_json::from_value(serde_json::json!({"source": "a", "target": "b"})).unwrap();
        assert_eq!(conn.source_output, "main");
        assert_eq!(conn.target_input, "main");

        let camel: Connection = serde_json::from_value(serde_json::json!({
            "sourceNodeId": "a", "targetNodeId": "b", "sourceOutput": "true"
        }))
        .unwrap();
        assert_eq!(camel, Connection::from_port("a", "true", "b"));
    }
}
