//! Node registry - maps node type ids to implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use super::types::{Node, NodeDefinition, NodeGroup};
use super::{
    CodeNode, DateTimeNode, EmailNode, HttpRequestNode, IfNode, ManualTriggerNode, MergeNode,
    ScheduleTriggerNode, SetNode, SwitchNode, WaitNode, WebhookTriggerNode,
};
use crate::error::{Error, Result};

/// Registry of available node types.
///
/// Built once at startup and shared by reference. The definition catalog is
/// derived lazily and dropped whenever a node type is (re-)registered.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
    catalog: OnceLock<Vec<NodeDefinition>>,
}

impl NodeRegistry {
    /// Create a new registry with the built-in nodes.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        // Triggers
        registry.register(Arc::new(ManualTriggerNode::new()));
        registry.register(Arc::new(ScheduleTriggerNode::new()));
        registry.register(Arc::new(WebhookTriggerNode::new()));

        // Actions
        registry.register(Arc::new(HttpRequestNode::new()));
        registry.register(Arc::new(EmailNode::new()));
        registry.register(Arc::new(WaitNode::new()));

        // Logic
        registry.register(Arc::new(IfNode::new()));
        registry.register(Arc::new(SwitchNode::new()));
        registry.register(Arc::new(MergeNode::new()));

        // Transform
        registry.register(Arc::new(SetNode::new()));
        registry.register(Arc::new(DateTimeNode::new()));
        registry.register(Arc::new(CodeNode::new()));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            nodes: HashMap::new(),
            catalog: OnceLock::new(),
        }
    }

    /// Register a node type, replacing any previous implementation.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.node_type().to_string(), node);
        self.catalog.take();
    }

    /// Get a node by type id.
    pub fn get(&self, node_type: &str) -> Result<Arc<dyn Node>> {
        self.nodes
            .get(node_type)
            .cloned()
            .ok_or_else(|| Error::UnknownNodeType(node_type.to_string()))
    }

    /// Check if a node type is registered.
    pub fn has(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    /// Registered type ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// All node definitions, sorted by type id.
    pub fn definitions(&self) -> &[NodeDefinition] {
        self.catalog.get_or_init(|| {
            let mut defs: Vec<NodeDefinition> =
                self.nodes.values().map(|node| node.definition()).collect();
            defs.sort_by(|a, b| a.node_type.cmp(&b.node_type));
            defs
        })
    }

    /// Definitions grouped by catalog group.
    pub fn definitions_by_group(&self) -> BTreeMap<NodeGroup, Vec<NodeDefinition>> {
        let mut grouped: BTreeMap<NodeGroup, Vec<NodeDefinition>> = BTreeMap::new();
        for def in self.definitions() {
            grouped.entry(def.group).or_default().push(def.clone());
        }
        grouped
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
