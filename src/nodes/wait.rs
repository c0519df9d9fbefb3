//! Wait node - suspend the run until a time passes or an event arrives.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::types::{
    Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition, SuspendRequest,
};
use crate::error::{Error, Result};
use crate::expression::{numeric_value, stringify};
use crate::storage::WaitKind;

/// Wait node that suspends the run.
pub struct WaitNode;

impl WaitNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WaitConfig {
    #[serde(default = "default_wait_type")]
    wait_type: String,

    /// Number of `unit`s to wait; templates arrive as strings
    #[serde(default)]
    amount: Option<Value>,

    #[serde(default = "default_unit")]
    unit: String,

    /// Wake at a specific RFC 3339 timestamp instead of `amount`
    #[serde(default)]
    until: Option<String>,

    #[serde(default)]
    condition: Option<Value>,
}

fn default_wait_type() -> String {
    "time".to_string()
}

fn default_unit() -> String {
    "hours".to_string()
}

#[async_trait]
impl Node for WaitNode {
    fn node_type(&self) -> &str {
        "wait"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "Wait",
            self.node_type(),
            NodeGroup::Action,
            "Pause the run for a time, until a webhook arrives, or until a condition holds",
        )
        .with_property(
            PropertyDefinition::new("wait_type", "Wait Type", "options")
                .with_options(&[
                    ("Time Interval", "time"),
                    ("Webhook", "webhook"),
                    ("Condition", "condition"),
                ])
                .with_default(Value::String("time".into())),
        )
        .with_property(
            PropertyDefinition::new("amount", "Amount", "number").with_default(Value::from(1)),
        )
        .with_property(
            PropertyDefinition::new("unit", "Unit", "options")
                .with_options(&[
                    ("Seconds", "seconds"),
                    ("Minutes", "minutes"),
                    ("Hours", "hours"),
                    ("Days", "days"),
                ])
                .with_default(Value::String("hours".into())),
        )
        .with_property(PropertyDefinition::new("condition", "Condition", "string"))
    }

    async fn execute(&self, input: &Value, params: &Value, _: &Credentials) -> Result<NodeOutput> {
        let config: WaitConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid wait config: {}", e)))?;

        let request = match config.wait_type.as_str() {
            "time" => {
                let wake_at = wake_time(&config, Utc::now())?;
                info!(wake_at = %wake_at, "Wait node suspending until time");
                SuspendRequest {
                    wait_kind: WaitKind::Time,
                    wake_at: Some(wake_at),
                    carry: input.clone(),
                    condition: None,
                }
            }
            "webhook" => SuspendRequest {
                wait_kind: WaitKind::ExternalEvent,
                wake_at: None,
                carry: input.clone(),
                condition: None,
            },
            "condition" => SuspendRequest {
                wait_kind: WaitKind::Condition,
                wake_at: None,
                carry: input.clone(),
                condition: config.condition.as_ref().map(stringify),
            },
            other => {
                tracing::warn!(wait_type = other, "Unknown wait type, passing input through");
                return Ok(NodeOutput::Data(input.clone()));
            }
        };

        Ok(NodeOutput::Suspend(request))
    }
}

/// Compute the wake time of a time-based wait.
///
/// Unknown units fall back to one hour.
fn wake_time(config: &WaitConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Some(until) = config.until.as_deref().filter(|u| !u.trim().is_empty()) {
        let target = DateTime::parse_from_rfc3339(until)
            .map_err(|e| Error::node(format!("Invalid 'until' timestamp '{}': {}", until, e)))?;
        return Ok(target.with_timezone(&Utc));
    }

    let amount = match &config.amount {
        None | Some(Value::Null) => 1.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(other) => numeric_value(&stringify(other))
            .ok_or_else(|| Error::node(format!("Invalid wait amount '{}'", stringify(other))))?,
    };
    if amount < 0.0 {
        return Err(Error::node("Wait duration cannot be negative"));
    }

    let seconds_per_unit = match config.unit.as_str() {
        "seconds" => 1.0,
        "minutes" => 60.0,
        "hours" => 3600.0,
        "days" => 86_400.0,
        _ => return Ok(now + Duration::hours(1)),
    };

    let millis = (amount * seconds_per_unit * 1000.0).round();
    let out_of_range = || Error::node(format!("Wait duration of {} {} is out of range", amount, config.unit));
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(out_of_range)
}
