//! Trigger nodes - entry points of a workflow.
//!
//! Triggers pass their input through unchanged. What actually starts a run
//! (a cron service, HTTP ingress, a person at the CLI) lives outside the
//! engine; `register` only describes how that collaborator should be wired.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{
    Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition, TriggerNode,
    TriggerRegistration,
};
use crate::error::{Error, Result};

/// Manual trigger node.
pub struct ManualTriggerNode;

impl ManualTriggerNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManualTriggerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ManualTriggerNode {
    fn node_type(&self) -> &str {
        "manual_trigger"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Manual Trigger",
            self.node_type(),
            NodeGroup::Trigger,
            "Starts workflow manually",
        )
        .with_property(
            PropertyDefinition::new("description", "Description", "string")
                .with_default(json!("Manual trigger to start workflow")),
        )
    }

    async fn execute(&self, input: &Value, _: &Value, _: &Credentials) -> Result<NodeOutput> {
        Ok(NodeOutput::Data(input.clone()))
    }

    fn as_trigger(&self) -> Option<&dyn TriggerNode> {
        Some(self)
    }
}

impl TriggerNode for ManualTriggerNode {
    fn register(&self, _: &str, _: &str, _: &Value) -> Result<TriggerRegistration> {
        Ok(TriggerRegistration::Manual)
    }
}

/// Schedule trigger node.
pub struct ScheduleTriggerNode;

impl ScheduleTriggerNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScheduleTriggerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleConfig {
    #[serde(default = "default_cron")]
    cron_expression: String,
    #[serde(default = "default_timezone")]
    timezone: String,
}

fn default_cron() -> String {
    "* * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[async_trait]
impl Node for ScheduleTriggerNode {
    fn node_type(&self) -> &str {
        "schedule_trigger"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Schedule Trigger",
            self.node_type(),
            NodeGroup::Trigger,
            "Triggers workflow on a schedule",
        )
        .with_property(
            PropertyDefinition::new("cron_expression", "Cron Expression", "string")
                .with_default(json!("* * * * *")),
        )
        .with_property(
            PropertyDefinition::new("timezone", "Timezone", "string").with_default(json!("UTC")),
        )
    }

    async fn execute(&self, input: &Value, _: &Value, _: &Credentials) -> Result<NodeOutput> {
        Ok(NodeOutput::Data(input.clone()))
    }

    fn as_trigger(&self) -> Option<&dyn TriggerNode> {
        Some(self)
    }
}

impl TriggerNode for ScheduleTriggerNode {
    fn register(
        &self,
        workflow_id: &str,
        node_id: &str,
        params: &Value,
    ) -> Result<TriggerRegistration> {
        let config: ScheduleConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid schedule config: {}", e)))?;

        if config.cron_expression.split_whitespace().count() < 5 {
            return Err(Error::node(format!(
                "Invalid cron expression '{}'",
                config.cron_expression
            )));
        }
        config
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| Error::node(format!("Invalid timezone '{}'", config.timezone)))?;

        tracing::debug!(workflow_id, node_id, cron = %config.cron_expression, "Schedule registered");
        Ok(TriggerRegistration::Schedule {
            cron: config.cron_expression,
            timezone: config.timezone,
        })
    }
}

/// Webhook trigger node.
pub struct WebhookTriggerNode;

impl WebhookTriggerNode {
    pub fn new() -> Self {
        Self
    }

    /// Build the run input for an incoming webhook request.
    ///
    /// Header names are lowercased; repeated headers keep the last value.
    pub fn capture_request<'a>(
        method: &str,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        query: impl IntoIterator<Item = (&'a str, &'a str)>,
        body: Value,
    ) -> Value {
        let headers: BTreeMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        let query: BTreeMap<String, String> = query
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        json!({
            "headers": headers,
            "query": query,
            "body": body,
            "method": method.to_ascii_uppercase(),
        })
    }
}

impl Default for WebhookTriggerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default = "default_response_mode")]
    response_mode: String,
    #[serde(default)]
    path: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_response_mode() -> String {
    "last_node".to_string()
}

#[async_trait]
impl Node for WebhookTriggerNode {
    fn node_type(&self) -> &str {
        "webhook_trigger"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Webhook Trigger",
            self.node_type(),
            NodeGroup::Trigger,
            "Triggers workflow when webhook receives HTTP request",
        )
        .with_property(
            PropertyDefinition::new("method", "HTTP Method", "options")
                .with_options(&[
                    ("GET", "GET"),
                    ("POST", "POST"),
                    ("PUT", "PUT"),
                    ("DELETE", "DELETE"),
                ])
                .with_default(json!("POST")),
        )
        .with_property(
            PropertyDefinition::new("response_mode", "Response Mode", "options")
                .with_options(&[
                    ("Respond Immediately", "immediate"),
                    ("When Last Node Finishes", "last_node"),
                    ("Wait for Webhook Node", "wait_for_webhook"),
                ])
                .with_default(json!("last_node")),
        )
    }

    async fn execute(&self, input: &Value, _: &Value, _: &Credentials) -> Result<NodeOutput> {
        Ok(NodeOutput::Data(input.clone()))
    }

    fn as_trigger(&self) -> Option<&dyn TriggerNode> {
        Some(self)
    }
}

impl TriggerNode for WebhookTriggerNode {
    fn register(
        &self,
        workflow_id: &str,
        node_id: &str,
        params: &Value,
    ) -> Result<TriggerRegistration> {
        let config: WebhookConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid webhook config: {}", e)))?;

        let method = config.method.to_ascii_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "DELETE") {
            return Err(Error::node(format!("Unsupported webhook method '{}'", method)));
        }

        let path = config
            .path
            .filter(|p| !p.trim().is_empty())
            .map(|p| format!("/{}", p.trim_start_matches('/')))
            .unwrap_or_else(|| format!("/webhook/{}/{}", workflow_id, node_id));

        Ok(TriggerRegistration::Webhook {
            method,
            path,
            response_mode: config.response_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_triggers_pass_input_through() {
        let input = json!({"original_value": "test"});
        let creds = Credentials::new();
        for node in [
            Box::new(ManualTriggerNode::new()) as Box<dyn Node>,
            Box::new(ScheduleTriggerNode::new()),
            Box::new(WebhookTriggerNode::new()),
        ] {
            let out = node.execute(&input, &json!({}), &creds).await.unwrap();
            assert_eq!(out, NodeOutput::Data(input.clone()));
            assert!(node.as_trigger().is_some());
        }
    }

    #[test]
    fn test_schedule_registration_defaults() {
        let reg = ScheduleTriggerNode::new()
            .register("wf-1", "cron", &json!({}))
            .unwrap();
        assert_eq!(
            reg,
            TriggerRegistration::Schedule {
                cron: "* * * * *".into(),
                timezone: "UTC".into()
            }
        );

        assert!(ScheduleTriggerNode::new()
            .register("wf-1", "cron", &json!({"timezone": "Mars/Olympus"}))
            .is_err());
    }

    #[test]
    fn test_webhook_registration() {
        let node = WebhookTriggerNode::new();
        let reg = node.register("wf-1", "hook", &json!({})).unwrap();
        assert_eq!(
            reg,
            TriggerRegistration::Webhook {
                method: "POST".into(),
                path: "/webhook/wf-1/hook".into(),
                response_mode: "last_node".into()
            }
        );

        let custom = node
            .register("wf-1", "hook", &json!({"method": "get", "path": "orders"}))
            .unwrap();
        assert!(matches!(
            custom,
            TriggerRegistration::Webhook { ref method, ref path, .. } if method == "GET" && path == "/orders"
        ));
        assert!(node.unregister("wf-1", "hook").is_ok());
    }

    #[test]
    fn test_capture_request() {
        let captured = WebhookTriggerNode::capture_request(
            "post",
            [("Content-Type", "application/json")],
            [("page", "2")],
            json!({"order": 7}),
        );
        assert_eq!(
            captured,
            json!({
                "headers": {"content-type": "application/json"},
                "query": {"page": "2"},
                "body": {"order": 7},
                "method": "POST"
            })
        );
    }
}
