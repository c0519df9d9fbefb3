//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
}

impl RunStatus {
    /// Success or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Manual,
    Webhook,
    Schedule,
    Retry,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Schedule => write!(f, "schedule"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "webhook" => Ok(Self::Webhook),
            "schedule" => Ok(Self::Schedule),
            "retry" => Ok(Self::Retry),
            _ => Err(format!("Unknown run mode: {}", s)),
        }
    }
}

/// Run record: one execution attempt of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub mode: RunMode,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_trace: Option<String>,
    pub retry_count: u32,
    pub parent_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub waiting_until: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl Run {
    /// Create a pending run.
    pub fn new(workflow_id: &str, workflow_name: &str, mode: RunMode, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Pending,
            mode,
            input,
            output: None,
            error: None,
            error_trace: None,
            retry_count: 0,
            parent_run_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            waiting_until: None,
            duration_ms: None,
        }
    }
}

/// Node run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for NodeRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for NodeRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown node status: {}", s)),
        }
    }
}

/// Per-node record, one per node visited in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunRecord {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: NodeRunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// What a suspended run is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Time,
    ExternalEvent,
    Condition,
}

impl std::fmt::Display for WaitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::ExternalEvent => write!(f, "external_event"),
            Self::Condition => write!(f, "condition"),
        }
    }
}

impl std::str::FromStr for WaitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(Self::Time),
            "external_event" | "webhook" => Ok(Self::ExternalEvent),
            "condition" => Ok(Self::Condition),
            _ => Err(format!("Unknown wait kind: {}", s)),
        }
    }
}

/// Persisted state of a suspended run. At most one per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedState {
    pub run_id: String,
    /// Node that requested the suspension
    pub node_id: String,
    pub wait_kind: WaitKind,
    pub wake_at: Option<DateTime<Utc>>,
    /// Payload carried through the graph at the moment of suspension
    pub resume_context: Value,
    /// Condition text for `WaitKind::Condition`
    pub condition: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters per workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub workflow_id: String,
    pub execution_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

/// A run with its node records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub run: Run,
    pub nodes: Vec<NodeRunRecord>,
    pub suspended: Option<SuspendedState>,
}

/// Counts removed by a retention cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub runs_deleted: u64,
    pub failed_runs_deleted: u64,
}
