//! Node trait, definitions, and result types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::WaitKind;
use crate::workflow::MAIN_PORT;

/// Credential fields handed to a node.
pub type Credentials = serde_json::Map<String, Value>;

/// Catalog group of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Trigger,
    Action,
    Logic,
    Transform,
}

impl std::fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trigger => write!(f, "trigger"),
            Self::Action => write!(f, "action"),
            Self::Logic => write!(f, "logic"),
            Self::Transform => write!(f, "transform"),
        }
    }
}

/// Allowed value of an options property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOption {
    pub name: String,
    pub value: Value,
}

/// Declared node parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<PropertyOption>,
}

impl PropertyDefinition {
    pub fn new(name: &str, display_name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: kind.to_string(),
            required: false,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Options given as `(label, value)` pairs.
    pub fn with_options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options
            .iter()
            .map(|(name, value)| PropertyOption {
                name: name.to_string(),
                value: Value::String(value.to_string()),
            })
            .collect();
        self
    }
}

/// Declared credential requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRequirement {
    pub name: String,
    pub required: bool,
}

/// Self-description of a node type, used for catalog discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Human readable name
    pub name: String,
    /// Registry key
    #[serde(rename = "type")]
    pub node_type: String,
    pub group: NodeGroup,
    pub version: u32,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub properties: Vec<PropertyDefinition>,
    pub credentials: Vec<CredentialRequirement>,
}

impl NodeDefinition {
    /// Definition with one `main` input and output.
    ///
    /// Trigger nodes start without inputs.
    pub fn new(name: &str, node_type: &str, group: NodeGroup, description: &str) -> Self {
        let inputs = if group == NodeGroup::Trigger {
            Vec::new()
        } else {
            vec![MAIN_PORT.to_string()]
        };

        Self {
            name: name.to_string(),
            node_type: node_type.to_string(),
            group,
            version: 1,
            description: description.to_string(),
            inputs,
            outputs: vec![MAIN_PORT.to_string()],
            properties: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_credential(mut self, name: &str, required: bool) -> Self {
        self.credentials.push(CredentialRequirement {
            name: name.to_string(),
            required,
        });
        self
    }
}

/// Check that every required property is present and non-empty.
pub fn validate_required(definition: &NodeDefinition, params: &Value) -> Result<()> {
    for property in definition.properties.iter().filter(|p| p.required) {
        let empty = match params.get(&property.name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(fields)) => fields.is_empty(),
            Some(_) => false,
        };
        if empty {
            return Err(Error::MissingRequiredParameter(property.name.clone()));
        }
    }
    Ok(())
}

/// A node's request to pause the run.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendRequest {
    pub wait_kind: WaitKind,
    pub wake_at: Option<DateTime<Utc>>,
    /// Payload restored when the run resumes
    pub carry: Value,
    /// Condition text for condition waits
    pub condition: Option<String>,
}

/// Outcome of a node execution.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Plain payload on the `main` port.
    Data(Value),
    /// Payload on a named output port.
    Branch { port: String, data: Value },
    /// Pause the run.
    Suspend(SuspendRequest),
}

impl NodeOutput {
    pub fn branch(port: impl Into<String>, data: Value) -> Self {
        Self::Branch {
            port: port.into(),
            data,
        }
    }

    /// Port the walker follows, `None` when suspending.
    pub fn port(&self) -> Option<&str> {
        match self {
            Self::Data(_) => Some(MAIN_PORT),
            Self::Branch { port, .. } => Some(port),
            Self::Suspend(_) => None,
        }
    }

    /// Payload carried to the next node (or restored on resume).
    pub fn payload(&self) -> &Value {
        match self {
            Self::Data(data) | Self::Branch { data, .. } => data,
            Self::Suspend(request) => &request.carry,
        }
    }
}

/// How a trigger wants to be wired to its external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerRegistration {
    Manual,
    Schedule {
        cron: String,
        timezone: String,
    },
    Webhook {
        method: String,
        path: String,
        response_mode: String,
    },
}

/// Trait that all node types must implement.
#[async_trait]
pub trait Node: Send + Sync {
    /// Registry key (e.g. "http_request", "if").
    fn node_type(&self) -> &str;

    /// Catalog definition.
    fn definition(&self) -> NodeDefinition;

    /// Check raw parameters before template resolution.
    fn validate(&self, params: &Value) -> Result<()> {
        validate_required(&self.definition(), params)
    }

    /// Execute the node.
    ///
    /// # Arguments
    /// * `input` - Payload carried from the previous node
    /// * `params` - Parameters with templates already resolved
    /// * `credentials` - Fields fetched for the node's credential reference
    async fn execute(
        &self,
        input: &Value,
        params: &Value,
        credentials: &Credentials,
    ) -> Result<NodeOutput>;

    /// Trigger capabilities, for trigger nodes.
    fn as_trigger(&self) -> Option<&dyn TriggerNode> {
        None
    }
}

/// Registration hooks of trigger nodes.
pub trait TriggerNode: Send + Sync {
    fn register(
        &self,
        workflow_id: &str,
        node_id: &str,
        params: &Value,
    ) -> Result<TriggerRegistration>;

    fn unregister(&self, workflow_id: &str, node_id: &str) -> Result<()> {
        tracing::debug!(workflow_id, node_id, "Trigger unregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> NodeDefinition {
        NodeDefinition::new("Test", "test", NodeGroup::Action, "test node")
            .with_property(PropertyDefinition::new("url", "URL", "string").required())
            .with_property(PropertyDefinition::new("timeout", "Timeout", "number"))
    }

    #[test]
    fn test_validate_required() {
        let def = definition();
        assert!(validate_required(&def, &json!({"url": "https://x"})).is_ok());
        assert!(validate_required(&def, &json!({"url": 0})).is_ok());
        assert!(validate_required(&def, &json!({"url": {"host": "x"}})).is_ok());

        for params in [
            json!({}),
            json!({"url": ""}),
            json!({"url": "  "}),
            json!({"url": null}),
            json!({"url": []}),
            json!({"url": {}}),
        ] {
            assert!(matches!(
                validate_required(&def, &params),
                Err(Error::MissingRequiredParameter(name)) if name == "url"
            ));
        }
    }

    #[test]
    fn test_trigger_definitions_have_no_inputs() {
        let def = NodeDefinition::new("Manual", "manual_trigger", NodeGroup::Trigger, "");
        assert!(def.inputs.is_empty());
        assert_eq!(def.outputs, vec!["main"]);
        assert_eq!(def.version, 1);
    }

    #[test]
    fn test_definition_serializes_camel_case() {
        let def = definition();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "test");
        assert_eq!(json["group"], "action");
        assert_eq!(json["properties"][0]["displayName"], "URL");
        assert_eq!(json["properties"][0]["required"], true);
    }

    #[test]
    fn test_output_ports() {
        assert_eq!(NodeOutput::Data(json!(1)).port(), Some("main"));
        assert_eq!(NodeOutput::branch("true", json!(1)).port(), Some("true"));
        let suspend = NodeOutput::Suspend(SuspendRequest {
            wait_kind: WaitKind::ExternalEvent,
            wake_at: None,
            carry: json!({"a": 1}),
            condition: None,
        });
        assert_eq!(suspend.port(), None);
        assert_eq!(suspend.payload(), &json!({"a": 1}));
    }
}
