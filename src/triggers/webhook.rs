//! Webhook delivery.
//!
//! Maps `(method, path)` to workflows whose entry trigger is a webhook, starts
//! runs from incoming requests and resumes runs waiting on an external event.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::engine::{ExecutionGraph, Executor};
use crate::error::{Error, Result};
use crate::nodes::{TriggerRegistration, WebhookTriggerNode};
use crate::storage::{Run, RunMode};
use crate::workflow::WorkflowGraph;

/// An HTTP request as received by the outer server.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Value,
}

struct Route {
    graph: WorkflowGraph,
    response_mode: String,
}

/// Routes webhook requests to workflow runs.
pub struct WebhookRouter {
    executor: Arc<Executor>,
    routes: HashMap<(String, String), Route>,
}

impl WebhookRouter {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            routes: HashMap::new(),
        }
    }

    /// Register a workflow. Returns false when its entry trigger is not a
    /// webhook; a later registration of the same route replaces the earlier.
    pub fn register(&mut self, graph: WorkflowGraph) -> Result<bool> {
        let entry = ExecutionGraph::new(&graph).entry_node()?;
        let node = self.executor.registry().get(&entry.node_type)?;
        let Some(trigger) = node.as_trigger() else {
            return Ok(false);
        };

        match trigger.register(&graph.id, &entry.id, &entry.parameters)? {
            TriggerRegistration::Webhook {
                method,
                path,
                response_mode,
            } => {
                info!("Registered webhook: {} {}", method, path);
                let key = (method, path);
                if self.routes.contains_key(&key) {
                    warn!(workflow_id = %graph.id, "Webhook route {} {} replaced", key.0, key.1);
                }
                self.routes.insert(key, Route { graph, response_mode });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Registered routes as `(method, path)` pairs.
    pub fn routes(&self) -> Vec<(&str, &str)> {
        let mut routes: Vec<_> = self
            .routes
            .keys()
            .map(|(m, p)| (m.as_str(), p.as_str()))
            .collect();
        routes.sort();
        routes
    }

    /// Response mode configured on the route, if registered.
    pub fn response_mode(&self, method: &str, path: &str) -> Option<&str> {
        self.routes
            .get(&(method.to_ascii_uppercase(), path.to_string()))
            .map(|r| r.response_mode.as_str())
    }

    /// Start a webhook-mode run for an incoming request.
    #[instrument(name = "webhook.dispatch", skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: &WebhookRequest) -> Result<Run> {
        let key = (request.method.to_ascii_uppercase(), request.path.clone());
        let route = self.routes.get(&key).ok_or_else(|| {
            Error::Workflow(format!("No webhook registered for {} {}", key.0, key.1))
        })?;

        let input = WebhookTriggerNode::capture_request(
            &request.method,
            request.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            request.body.clone(),
        );

        info!("Webhook triggered for workflow '{}'", route.graph.name);
        self.executor
            .start_run(&route.graph, input, RunMode::Webhook)
            .await
    }

    /// Resume a waiting run with an event payload.
    pub async fn deliver_event(&self, run_id: &str, payload: Value) -> Result<Run> {
        self.executor.resume_run(run_id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::nodes::NodeRegistry;
    use crate::storage::{RunStatus, SqliteStorage};
    use crate::workflow::parse_workflow;
    use serde_json::json;

    fn router() -> WebhookRouter {
        let executor = Executor::new(
            Arc::new(NodeRegistry::new()),
            SqliteStorage::open_in_memory().unwrap(),
            Arc::new(StaticCredentials::new()),
        );
        WebhookRouter::new(Arc::new(executor))
    }

    const ORDERS: &str = r#"
id: orders
name: Orders
nodes:
  - id: hook
    type: webhook_trigger
    parameters: { method: post, path: orders }
  - id: approval
    type: wait
    parameters: { wait_type: webhook }
  - id: tag
    type: set
    parameters:
      values: [{ name: customer, setTo: "{{ $json.body.customer }}" }]
connections:
  - { source: hook, target: approval }
  - { source: approval, target: tag }
"#;

    #[tokio::test]
    async fn test_dispatch_and_event_delivery() {
        let mut router = router();
        assert!(router.register(parse_workflow(ORDERS).unwrap()).unwrap());
        assert_eq!(router.routes(), vec![("POST", "/orders")]);
        assert_eq!(router.response_mode("post", "/orders"), Some("last_node"));

        let request = WebhookRequest {
            method: "post".into(),
            path: "/orders".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            query: vec![],
            body: json!({"customer": "acme"}),
        };
        let run = router.dispatch(&request).await.unwrap();
        assert_eq!(run.mode, RunMode::Webhook);
        assert_eq!(run.status, RunStatus::Waiting);
        assert_eq!(run.input["headers"]["content-type"], "application/json");
        assert_eq!(run.input["method"], "POST");

        let resumed = router
            .deliver_event(&run.id, json!({"approved": true}))
            .await
            .unwrap();
        assert_eq!(resumed.status, RunStatus::Success);
        let output = resumed.output.unwrap();
        assert_eq!(output["customer"], "acme");
        assert_eq!(output["approved"], true);
    }

    #[tokio::test]
    async fn test_unregistered_route() {
        let router = router();
        let err = router
            .dispatch(&WebhookRequest {
                method: "GET".into(),
                path: "/nope".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No webhook registered for GET /nope"));
    }

    #[tokio::test]
    async fn test_manual_entry_is_not_routed() {
        let mut router = router();
        let graph = parse_workflow("name: m\nnodes:\n  - { id: s, type: manual_trigger }\n").unwrap();
        assert!(!router.register(graph).unwrap());
        assert!(router.routes().is_empty());
    }
}
