//! Workflow YAML/JSON parser.

use std::path::Path;

use super::types::WorkflowGraph;
use crate::error::{Error, Result};

/// Parse a workflow from a YAML (or JSON) string.
pub fn parse_workflow(source: &str) -> Result<WorkflowGraph> {
    if source.trim().is_empty() {
        return Err(Error::Parse("Empty workflow definition".to_string()));
    }

    let mut workflow: WorkflowGraph = serde_yaml::from_str(source).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid workflow: {}", msg))
        }
    })?;

    if workflow.id.is_empty() {
        workflow.id = workflow.name.clone();
    }
    Ok(workflow)
}

/// Parse a workflow from a file path.
pub fn parse_workflow_file(path: &Path) -> Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: test-workflow
nodes:
  - id: start
    type: manual_trigger
  - id: shape
    type: set
    name: Shape
    parameters:
      values:
        - name: new_field
          setTo: "processed_{{ $json.original_value }}"
connections:
  - source: start
    target: shape
"#;

        let workflow = parse_workflow(yaml).unwrap();
        assert_eq!(workflow.id, "test-workflow");
        assert!(workflow.active);
        assert_eq!(workflow.nodes.len(), 2);
        assert_eq!(workflow.nodes[1].display_name(), "Shape");
        assert_eq!(workflow.connections[0].source_output, "main");
    }

    #[test]
    fn test_parse_json_definition() {
        let json = r#"{
            "id": "wf-9",
            "name": "json-flow",
            "nodes": [{"id": "t", "type": "webhook_trigger", "credentials": "7"}],
            "connections": []
        }"#;

        let workflow = parse_workflow(json).unwrap();
        assert_eq!(workflow.id, "wf-9");
        assert_eq!(workflow.nodes[0].credential_ref.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(matches!(parse_workflow("  "), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_missing_field() {
        let err = parse_workflow("name: x\n").unwrap_err();
        assert_eq!(err.to_string(), "Parse error: Missing required field: nodes");
    }
}
