//! Adjacency view of a workflow graph used by the walker.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::workflow::{WorkflowGraph, WorkflowNode, MAIN_PORT};

#[derive(Debug, Clone)]
struct Edge {
    target: String,
    source_output: String,
}

/// Outgoing edges per node, in connection declaration order.
#[derive(Debug, Clone)]
pub struct ExecutionGraph<'a> {
    graph: &'a WorkflowGraph,
    outgoing: HashMap<&'a str, Vec<Edge>>,
}

impl<'a> ExecutionGraph<'a> {
    pub fn new(graph: &'a WorkflowGraph) -> Self {
        let mut outgoing: HashMap<&'a str, Vec<Edge>> = HashMap::new();
        for conn in &graph.connections {
            outgoing.entry(conn.source.as_str()).or_default().push(Edge {
                target: conn.target.clone(),
                source_output: conn.source_output.clone(),
            });
        }
        Self { graph, outgoing }
    }

    /// First trigger node in declaration order.
    ///
    /// Only one entry point is used even when several triggers exist.
    pub fn entry_node(&self) -> Result<&'a WorkflowNode> {
        self.graph
            .nodes
            .iter()
            .find(|n| n.is_trigger())
            .ok_or(Error::NoTriggerNode)
    }

    pub fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.graph.node(id)
    }

    /// Successor reached from `current` through `port`.
    ///
    /// An edge matches when it leaves the given port or the `main` port; the
    /// first match in declaration order wins.
    pub fn next_node(&self, current: &str, port: &str) -> Option<&'a WorkflowNode> {
        let edge = self
            .outgoing
            .get(current)?
            .iter()
            .find(|e| e.source_output == port || e.source_output == MAIN_PORT)?;
        self.graph.node(&edge.target)
    }

    /// Number of edges leaving a node.
    pub fn out_degree(&self, node_id: &str) -> usize {
        self.outgoing.get(node_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parse_workflow;

    fn graph() -> WorkflowGraph {
        parse_workflow(
            r#"
name: branching
nodes:
  - { id: check, type: if }
  - { id: start, type: manual_trigger }
  - { id: yes, type: set }
  - { id: no, type: set }
  - { id: later, type: webhook_trigger }
connections:
  - { source: start, target: check }
  - { source: check, target: yes, source_output: "true" }
  - { source: check, target: no, source_output: "false" }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_entry_is_first_trigger_in_declaration_order() {
        let g = graph();
        let exec = ExecutionGraph::new(&g);
        assert_eq!(exec.entry_node().unwrap().id, "start");
    }

    #[test]
    fn test_no_trigger() {
        let g = parse_workflow("name: x\nnodes:\n  - { id: a, type: set }\n").unwrap();
        assert!(matches!(
            ExecutionGraph::new(&g).entry_node(),
            Err(Error::NoTriggerNode)
        ));
    }

    #[test]
    fn test_branch_ports() {
        let g = graph();
        let exec = ExecutionGraph::new(&g);
        assert_eq!(exec.next_node("check", "true").unwrap().id, "yes");
        assert_eq!(exec.next_node("check", "false").unwrap().id, "no");
        assert!(exec.next_node("check", "main").is_none());
        assert!(exec.next_node("yes", "main").is_none());
        assert_eq!(exec.out_degree("check"), 2);
    }

    #[test]
    fn test_main_edge_is_wildcard_and_first_match_wins() {
        let mut g = graph();
        g.connections
            .insert(1, crate::workflow::Connection::new("check", "no"));
        let exec = ExecutionGraph::new(&g);
        assert_eq!(exec.next_node("check", "true").unwrap().id, "no");
        assert_eq!(exec.next_node("start", "main").unwrap().id, "check");
    }
}
