//! Structural workflow validation.

use std::collections::HashSet;

use super::types::WorkflowGraph;
use crate::error::{Error, Result};
use crate::nodes::NodeRegistry;

/// Validate a workflow graph.
///
/// Checks for:
/// - Non-empty name and at least one node
/// - Unique, non-empty node IDs
/// - Connections referencing existing nodes
///
/// Cycles are allowed; the run step ceiling bounds them.
pub fn validate_workflow(workflow: &WorkflowGraph) -> Result<()> {
    if workflow.name.trim().is_empty() {
        return Err(Error::Workflow("Workflow name is required".into()));
    }

    if workflow.nodes.is_empty() {
        return Err(Error::Workflow("Workflow must have at least one node".into()));
    }

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(Error::Workflow("Node ID cannot be empty".into()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(Error::Workflow(format!("Duplicate node ID: {}", node.id)));
        }
    }

    for conn in &workflow.connections {
        if !ids.contains(conn.source.as_str()) {
            return Err(Error::Workflow(format!(
                "Connection source '{}' does not exist",
                conn.source
            )));
        }
        if !ids.contains(conn.target.as_str()) {
            return Err(Error::Workflow(format!(
                "Connection target '{}' does not exist",
                conn.target
            )));
        }
    }

    Ok(())
}

/// Validate structure and that every node type is registered.
pub fn validate_workflow_with_registry(
    workflow: &WorkflowGraph,
    registry: &NodeRegistry,
) -> Result<()> {
    validate_workflow(workflow)?;

    for node in &workflow.nodes {
        if !registry.has(&node.node_type) {
            return Err(Error::UnknownNodeType(node.node_type.clone()));
        }
    }

    Ok(())
}
