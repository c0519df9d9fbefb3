//! End-to-end run lifecycle through the public API.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use weft::credentials::{JsonFileCredentials, StaticCredentials};
use weft::engine::{Executor, Monitor, RunEvent};
use weft::expression::ExpressionEvaluator;
use weft::nodes::condition;
use weft::nodes::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, NodeRegistry};
use weft::storage::{NodeRunStatus, RunMode, RunStatus, SqliteStorage, WaitKind};
use weft::triggers::WaitPoller;
use weft::workflow::parse_workflow;
use weft::{Error, Result};

/// Stands in for an external side effect such as an outbound call.
struct SideEffectNode {
    performed: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for SideEffectNode {
    fn node_type(&self) -> &str {
        "side_effect"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("Side Effect", "side_effect", NodeGroup::Action, "test")
    }

    async fn execute(&self, input: &Value, _: &Value, _: &Credentials) -> Result<NodeOutput> {
        self.performed.fetch_add(1, Ordering::SeqCst);
        Ok(NodeOutput::Data(input.clone()))
    }
}

struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    fn node_type(&self) -> &str {
        "failing"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("Failing", "failing", NodeGroup::Action, "test")
    }

    async fn execute(&self, _: &Value, _: &Value, _: &Credentials) -> Result<NodeOutput> {
        Err(Error::node("downstream unavailable"))
    }
}

fn executor_with(performed: Arc<AtomicUsize>) -> Executor {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(SideEffectNode { performed }));
    registry.register(Arc::new(FailingNode));
    Executor::new(
        Arc::new(registry),
        SqliteStorage::open_in_memory().unwrap(),
        Arc::new(StaticCredentials::new()),
    )
}

fn executor() -> Executor {
    executor_with(Arc::new(AtomicUsize::new(0)))
}

const ROUTING: &str = r#"
name: routing
nodes:
  - { id: start, type: manual_trigger }
  - id: check
    type: if
    parameters:
      conditions:
        - { value1: "{{ $json.number }}", operation: greater_than, value2: 10 }
  - id: high
    type: set
    parameters: { values: [{ name: route, setTo: high }] }
  - id: low
    type: set
    parameters: { values: [{ name: route, setTo: low }] }
connections:
  - { source: start, target: check }
  - { source: check, target: high, source_output: "true" }
  - { source: check, target: low, source_output: "false" }
"#;

const APPROVAL: &str = r#"
id: approval
name: Approval
nodes:
  - { id: start, type: manual_trigger, name: Start }
  - id: hold
    type: wait
    parameters: { wait_type: webhook }
  - id: record
    type: set
    parameters:
      values:
        - { name: order, setTo: "{{ $node[\"Start\"].json.order }}" }
        - { name: decided_by, setTo: "{{ $json.reviewer }}" }
connections:
  - { source: start, target: hold }
  - { source: hold, target: record }
"#;

#[tokio::test]
async fn test_if_routes_to_each_port_successor() {
    let executor = executor();
    let graph = parse_workflow(ROUTING).unwrap();

    let high = executor
        .start_run(&graph, json!({"number": 15}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(high.output.unwrap()["route"], "high");

    let low = executor
        .start_run(&graph, json!({"number": 5}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(low.output.unwrap()["route"], "low");

    // Loose comparison: numeric strings compare as numbers.
    let loose = executor
        .start_run(&graph, json!({"number": "9"}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(loose.output.unwrap()["route"], "low");
}

#[tokio::test]
async fn test_event_wait_resumes_from_successor_with_named_node_reference() {
    let executor = executor();
    let graph = parse_workflow(APPROVAL).unwrap();

    let run = executor
        .start_run(&graph, json!({"order": "A-17", "reviewer": "nobody"}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Waiting);
    assert!(run.waiting_until.is_none());

    let state = executor.storage().get_suspended(&run.id).await.unwrap().unwrap();
    assert_eq!(state.wait_kind, WaitKind::ExternalEvent);

    let done = executor
        .resume_run(&run.id, json!({"reviewer": "kim"}))
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Success);
    let output = done.output.unwrap();
    assert_eq!(output["order"], "A-17");
    assert_eq!(output["decided_by"], "kim");

    let records = executor.storage().get_node_runs(&run.id).await.unwrap();
    assert_eq!(
        records.iter().filter(|r| r.node_id == "start").count(),
        1,
        "the trigger must not run again on resume"
    );
    assert!(matches!(
        executor.resume_run(&run.id, json!({})).await,
        Err(Error::NotWaiting(_))
    ));
}

#[tokio::test]
async fn test_poller_resumes_due_time_wait() {
    let executor = Arc::new(executor());
    let graph = parse_workflow(
        r#"
name: nap
nodes:
  - { id: start, type: manual_trigger }
  - id: nap
    type: wait
    parameters: { wait_type: time, amount: 1, unit: seconds }
connections:
  - { source: start, target: nap }
"#,
    )
    .unwrap();

    let run = executor
        .start_run(&graph, json!({"k": "v"}), RunMode::Schedule)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Waiting);

    let poller = WaitPoller::new(executor.clone());
    let resumed = poller
        .process_due(Utc::now() + chrono::Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(resumed, 1);

    let run = executor.storage().get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.output.unwrap(), json!({"k": "v"}));
}

#[tokio::test]
async fn test_side_effects_survive_bookkeeping_removal_and_repeat_on_retry() {
    let performed = Arc::new(AtomicUsize::new(0));
    let executor = executor_with(performed.clone());
    let graph = parse_workflow(
        r#"
name: effects
nodes:
  - { id: start, type: manual_trigger }
  - { id: notify, type: side_effect }
  - { id: sync, type: failing }
connections:
  - { source: start, target: notify }
  - { source: notify, target: sync }
"#,
    )
    .unwrap();

    let failed = executor
        .start_run(&graph, json!({}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("downstream unavailable"));
    assert_eq!(performed.load(Ordering::SeqCst), 1);

    let retry = executor.retry_run(&failed.id).await.unwrap();
    assert_eq!(retry.parent_run_id.as_deref(), Some(failed.id.as_str()));
    assert_eq!(performed.load(Ordering::SeqCst), 2);

    // Dropping the run bookkeeping leaves the performed effects in place.
    let far_future = Utc::now() + chrono::Duration::days(1000);
    let report = executor.storage().cleanup_runs(1, far_future).await.unwrap();
    assert_eq!(report.failed_runs_deleted, 2);
    assert!(executor.storage().get_run(&failed.id).await.unwrap().is_none());
    assert_eq!(performed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_credential_fails_the_node() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"present": {{"token": "t"}}}}"#).unwrap();

    let executor = Executor::new(
        Arc::new(NodeRegistry::new()),
        SqliteStorage::open_in_memory().unwrap(),
        Arc::new(JsonFileCredentials::new(file.path())),
    );
    let graph = parse_workflow(
        r#"
name: creds
nodes:
  - { id: start, type: manual_trigger }
  - id: call
    type: http_request
    credential_ref: absent
    parameters: { url: "https://example.com", authentication: bearer_token }
connections:
  - { source: start, target: call }
"#,
    )
    .unwrap();

    let run = executor
        .start_run(&graph, json!({}), RunMode::Manual)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error.as_deref(),
        Some("Credential resolution failed: Credential 'absent' not found")
    );

    let records = executor.storage().get_node_runs(&run.id).await.unwrap();
    assert_eq!(records.last().unwrap().status, NodeRunStatus::Failed);
}

#[tokio::test]
async fn test_out_of_range_parameters_fail_the_run() {
    let executor = executor();
    let cases = [
        ("wait", r#"{ wait_type: time, amount: 1e15, unit: days }"#),
        ("datetime", r#"{ operation: add, date: "2024-01-01", amount: 1e16, unit: seconds }"#),
        ("http_request", r#"{ url: "https://example.com", timeout: "inf" }"#),
    ];

    for (node_type, parameters) in cases {
        let graph = parse_workflow(&format!(
            "name: {node_type}-bounds\nnodes:\n  - {{ id: start, type: manual_trigger }}\n  - {{ id: x, type: {node_type}, parameters: {parameters} }}\nconnections:\n  - {{ source: start, target: x }}\n"
        ))
        .unwrap();

        let run = executor
            .start_run(&graph, json!({}), RunMode::Manual)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed, "{node_type}");

        let stored = executor.storage().get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed, "{node_type}");
        let records = executor.storage().get_node_runs(&run.id).await.unwrap();
        assert_eq!(records.last().unwrap().status, NodeRunStatus::Failed, "{node_type}");
    }
}

#[tokio::test]
async fn test_monitor_reports_failure() {
    let monitor = Arc::new(Monitor::new());
    let mut rx = monitor.subscribe();
    let executor = executor().with_monitor(monitor);
    let graph = parse_workflow(
        "name: f\nnodes:\n  - { id: s, type: manual_trigger }\n  - { id: x, type: failing }\nconnections:\n  - { source: s, target: x }\n",
    )
    .unwrap();

    let run = executor
        .start_run(&graph, json!({}), RunMode::Manual)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().all(|e| e.run_id() == run.id));
    assert!(matches!(events.last(), Some(RunEvent::RunFailed { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeFailed { node_id, .. } if node_id == "x")));
}

#[test]
fn test_expression_round_trip_and_loose_comparison() {
    let evaluator = ExpressionEvaluator::new();
    let context = json!({"json": {"a": 1}});

    let plain = "no templates here { just braces }";
    assert_eq!(evaluator.render(plain, &context), plain);
    assert_eq!(evaluator.render("{{  not.a.known.form  }}", &context), "not.a.known.form");

    assert!(condition::evaluate(&json!("10"), "equals", &json!(10)));
    assert!(!condition::evaluate(&json!("9"), "greater_than", &json!("10")));
}

#[test]
fn test_catalog_groups_builtin_nodes() {
    let registry = NodeRegistry::new();
    let groups = registry.definitions_by_group();

    let triggers = &groups[&NodeGroup::Trigger];
    assert!(triggers.iter().any(|d| d.node_type == "manual_trigger"));
    assert!(groups[&NodeGroup::Logic].iter().any(|d| d.node_type == "if"));
    assert!(registry.definitions().iter().all(|d| d.version == 1));
}
