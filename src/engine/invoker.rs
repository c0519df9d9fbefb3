//! Single-node invocation: lookup, validation, template resolution,
//! credential fetch, execution.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, instrument};

use super::context::RunContextBuilder;
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::expression::ExpressionEvaluator;
use crate::metrics;
use crate::nodes::{Credentials, NodeOutput, NodeRegistry};
use crate::workflow::WorkflowNode;

/// Calls node implementations on behalf of the walker.
#[derive(Clone)]
pub struct NodeInvoker {
    registry: Arc<NodeRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    evaluator: ExpressionEvaluator,
}

impl NodeInvoker {
    pub fn new(registry: Arc<NodeRegistry>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            registry,
            credentials,
            evaluator: ExpressionEvaluator::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: ExpressionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Invoke `node` with the carried `input`.
    ///
    /// Raw parameters are validated before any template is resolved, so a
    /// required parameter given only as a template still counts as present.
    #[instrument(
        name = "node.invoke",
        skip(self, node, input, context),
        fields(node_id = %node.id, node_type = %node.node_type)
    )]
    pub async fn invoke(
        &self,
        node: &WorkflowNode,
        input: &Value,
        context: &RunContextBuilder,
    ) -> Result<NodeOutput> {
        let implementation = self.registry.get(&node.node_type)?;
        implementation.validate(&node.parameters)?;

        let params = self
            .evaluator
            .resolve_parameters(&node.parameters, &context.build(input));

        let credentials = match &node.credential_ref {
            Some(credential_ref) => self.fetch_credentials(credential_ref).await?,
            None => Credentials::new(),
        };

        debug!("Executing node");
        let start = Instant::now();
        let result = implementation.execute(input, &params, &credentials).await;
        let status = if result.is_ok() { "success" } else { "failed" };
        metrics::record_node_execution(&node.node_type, status, start.elapsed());
        result
    }

    async fn fetch_credentials(&self, credential_ref: &str) -> Result<Credentials> {
        self.credentials
            .get_credential(credential_ref)
            .await
            .map_err(|e| match e {
                Error::CredentialResolution(_) => e,
                other => Error::CredentialResolution(other.to_string()),
            })
    }
}
