//! Read-only data context exposed to parameter templates.

use serde_json::{json, Map, Value};

use crate::storage::{NodeRunRecord, NodeRunStatus, Run};
use crate::workflow::{WorkflowGraph, WorkflowNode};

/// Accumulates run metadata and prior node outputs, and builds the context
/// map a node's parameters are resolved against:
///
/// ```json
/// {
///   "json": <payload flowing into the node>,
///   "execution": {"id": "...", "mode": "manual"},
///   "workflow": {"id": "...", "name": "...", "active": true},
///   "nodes": {"<node id>": {"name": "...", "json": <output>, "binary": []}}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RunContextBuilder {
    execution: Value,
    workflow: Value,
    nodes: Map<String, Value>,
}

impl RunContextBuilder {
    pub fn new(run: &Run, graph: &WorkflowGraph) -> Self {
        Self {
            execution: json!({
                "id": run.id,
                "mode": run.mode.to_string(),
            }),
            workflow: json!({
                "id": graph.id,
                "name": graph.name,
                "active": graph.active,
            }),
            nodes: Map::new(),
        }
    }

    /// Restore outputs of nodes that succeeded before a suspension.
    pub fn with_records(mut self, graph: &WorkflowGraph, records: &[NodeRunRecord]) -> Self {
        for record in records.iter().filter(|r| r.status == NodeRunStatus::Success) {
            if let (Some(node), Some(output)) = (graph.node(&record.node_id), &record.output) {
                self.record_output(node, output);
            }
        }
        self
    }

    /// Remember a node's output. A node visited twice keeps its latest output.
    pub fn record_output(&mut self, node: &WorkflowNode, output: &Value) {
        self.nodes.insert(
            node.id.clone(),
            json!({
                "name": node.display_name(),
                "json": output,
                "binary": [],
            }),
        );
    }

    /// Context for a node receiving `input`.
    pub fn build(&self, input: &Value) -> Value {
        json!({
            "json": input,
            "execution": self.execution,
            "workflow": self.workflow,
            "nodes": self.nodes,
        })
    }
}
