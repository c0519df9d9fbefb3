//! Error types for weft.
//!
//! Every variant carries a stable machine code so callers (CLI, job runners,
//! notification hooks) can branch on the failure without parsing messages.

use thiserror::Error;

/// Result type alias for weft operations.
pub type Result<T> = std::result::Result<T, Error>;

/// weft error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Missing required parameter: {0}")]
    MissingRequiredParameter(String),

    /// Any fault raised while a node runs, including downstream I/O.
    #[error("{message}")]
    NodeExecution {
        message: String,
        trace: Option<String>,
    },

    #[error("No trigger node found in workflow")]
    NoTriggerNode,

    #[error("Run {0} is not in waiting state")]
    NotWaiting(String),

    #[error("Run {run_id} cannot be retried: {reason}")]
    NotRetryable { run_id: String, reason: String },

    #[error("Credential resolution failed: {0}")]
    CredentialResolution(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Node failure with a message only.
    pub fn node(message: impl Into<String>) -> Self {
        Error::NodeExecution {
            message: message.into(),
            trace: None,
        }
    }

    /// Node failure carrying a debugging trace snippet.
    pub fn node_with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Error::NodeExecution {
            message: message.into(),
            trace: Some(trace.into()),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownNodeType(_) => "UNKNOWN_NODE_TYPE",
            Error::MissingRequiredParameter(_) => "MISSING_REQUIRED_PARAMETER",
            Error::NodeExecution { .. } => "NODE_EXECUTION_ERROR",
            Error::NoTriggerNode => "NO_TRIGGER_NODE",
            Error::NotWaiting(_) => "NOT_WAITING",
            Error::NotRetryable { .. } => "NOT_RETRYABLE",
            Error::CredentialResolution(_) => "CREDENTIAL_RESOLUTION_ERROR",
            Error::RunNotFound(_) => "RUN_NOT_FOUND",
            Error::Workflow(_) => "WORKFLOW_ERROR",
            Error::Cancelled(_) => "CANCELLED",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Short trace recorded next to the failure message on runs.
    ///
    /// Nodes may attach their own snippet; everything else falls back to the
    /// debug representation, capped so stored rows stay small.
    pub fn trace(&self) -> String {
        const MAX_TRACE_LEN: usize = 2000;

        let trace = match self {
            Error::NodeExecution {
                trace: Some(trace), ..
            } => trace.clone(),
            other => format!("{:?}", other),
        };

        if trace.len() > MAX_TRACE_LEN {
            let mut end = MAX_TRACE_LEN;
            while !trace.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &trace[..end])
        } else {
            trace
        }
    }

    /// Whether this is a caller contract violation rather than a run failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::NotWaiting(_) | Error::NotRetryable { .. } | Error::RunNotFound(_)
        )
    }

    /// Convert to a JSON error envelope.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}
