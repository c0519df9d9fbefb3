//! Run orchestrator: walks a workflow graph one node at a time and owns the
//! run state machine.
//!
//! ```text
//! Pending -> Running -> Success | Failed | Waiting
//! Waiting -> Running (resume) -> Success | Failed | Waiting
//! Failed  -> new Run in Retry mode (bounded by max_retries)
//! ```
//!
//! Node side effects are never rolled back. A failed run keeps the records of
//! the nodes that succeeded before it, and a retry executes them again.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn, Span};

use super::context::RunContextBuilder;
use super::graph::ExecutionGraph;
use super::invoker::NodeInvoker;
use super::monitor::{Monitor, RunEvent};
use crate::config::EngineConfig;
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::metrics;
use crate::nodes::{NodeOutput, NodeRegistry, SuspendRequest};
use crate::storage::{
    NodeRunRecord, NodeRunStatus, Run, RunMode, RunStatus, SqliteStorage, SuspendedState,
    WaitKind,
};
use crate::workflow::{WorkflowGraph, WorkflowNode, MAIN_PORT};

/// Registry of per-run cancellation signals.
///
/// The walker checks the signal between steps; a node already running is
/// allowed to finish.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    signals: Arc<Mutex<HashMap<String, Arc<OnceLock<String>>>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its signal.
    async fn register(&self, run_id: &str) -> Arc<OnceLock<String>> {
        self.signals
            .lock()
            .await
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    async fn unregister(&self, run_id: &str) {
        self.signals.lock().await.remove(run_id);
    }

    /// Request cancellation. Returns false if the run is not being stepped.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> bool {
        match self.signals.lock().await.get(run_id) {
            Some(signal) => {
                let _ = signal.set(reason.to_string());
                true
            }
            None => false,
        }
    }

    /// Cancel `run_id` once `after` elapses, as an outer job runner would on
    /// timeout. Abort the handle when the run finishes first.
    pub fn cancel_after(&self, run_id: &str, after: Duration) -> tokio::task::JoinHandle<bool> {
        let registry = self.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let reason = format!("timed out after {}s", after.as_secs());
            registry.cancel(&run_id, &reason).await
        })
    }
}

/// How a stretch of stepping ended.
enum Outcome {
    Completed(Value),
    Suspended,
    Failed(Error),
}

/// Workflow run orchestrator.
pub struct Executor {
    storage: SqliteStorage,
    invoker: NodeInvoker,
    monitor: Option<Arc<Monitor>>,
    cancellations: CancellationRegistry,
    max_steps: usize,
    max_retries: u32,
}

impl Executor {
    /// Create an executor with default engine limits.
    pub fn new(
        registry: Arc<NodeRegistry>,
        storage: SqliteStorage,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let defaults = EngineConfig::default();
        Self {
            storage,
            invoker: NodeInvoker::new(registry, credentials),
            monitor: None,
            cancellations: CancellationRegistry::new(),
            max_steps: defaults.max_steps,
            max_retries: defaults.max_retries,
        }
    }

    /// Apply step and retry limits from configuration.
    pub fn with_limits(mut self, config: &EngineConfig) -> Self {
        self.max_steps = config.max_steps.max(1);
        self.max_retries = config.max_retries;
        self
    }

    /// Attach a monitor for run/node lifecycle events.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Share a cancellation registry with an outer job runner.
    pub fn with_cancellations(mut self, cancellations: CancellationRegistry) -> Self {
        self.cancellations = cancellations;
        self
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.invoker.registry()
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Request cancellation of an in-flight run.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> bool {
        self.cancellations.cancel(run_id, reason).await
    }

    fn emit(&self, event: RunEvent) {
        if let Some(monitor) = &self.monitor {
            monitor.emit(event);
        }
    }

    /// Start a run of `graph`.
    ///
    /// Node failures (and a graph without a trigger) produce a `Failed` run,
    /// not an error; only storage faults are returned as `Err`.
    #[instrument(
        name = "run.start",
        skip_all,
        fields(workflow_id = %graph.id, mode = %mode, run_id = tracing::field::Empty)
    )]
    pub async fn start_run(&self, graph: &WorkflowGraph, input: Value, mode: RunMode) -> Result<Run> {
        let run = self.prepare_run(graph, input, mode).await?;
        self.execute_run(run, graph).await
    }

    /// Create the `Pending` run and snapshot the graph it will walk.
    pub async fn prepare_run(&self, graph: &WorkflowGraph, input: Value, mode: RunMode) -> Result<Run> {
        let run = Run::new(&graph.id, &graph.name, mode, input);
        self.storage.save_run(&run).await?;
        self.storage.save_run_graph(&run.id, graph).await?;
        Ok(run)
    }

    /// Drive a prepared run from its entry node.
    pub async fn execute_run(&self, mut run: Run, graph: &WorkflowGraph) -> Result<Run> {
        Span::current().record("run_id", run.id.as_str());
        let exec = ExecutionGraph::new(graph);

        let entry = match exec.entry_node() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(workflow_id = %graph.id, "Workflow has no trigger node");
                self.finish_failed(&mut run, &e).await?;
                return Ok(run);
            }
        };

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.storage.save_run(&run).await?;
        self.emit(RunEvent::RunStarted {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            mode: run.mode.to_string(),
        });
        info!(run_id = %run.id, "Starting run of workflow '{}'", graph.name);

        let context = RunContextBuilder::new(&run, graph);
        let input = run.input.clone();
        self.drive(&mut run, &exec, Some(entry), input, context).await?;
        Ok(run)
    }

    /// Resume a waiting run with externally supplied data.
    ///
    /// The data is merged over the payload saved at suspension and stepping
    /// continues from the successors of the node that suspended.
    #[instrument(name = "run.resume", skip_all, fields(run_id = %run_id))]
    pub async fn resume_run(&self, run_id: &str, data: Value) -> Result<Run> {
        let mut run = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Waiting {
            return Err(Error::NotWaiting(run_id.to_string()));
        }

        let state = self
            .storage
            .take_suspended(run_id)
            .await?
            .ok_or_else(|| Error::NotWaiting(run_id.to_string()))?;

        // Past this point the suspension is gone; failures settle the run.
        let graph = match self.storage.get_run_graph(run_id).await? {
            Some(graph) => graph,
            None => {
                let e = Error::Workflow(format!("No graph snapshot stored for run {}", run_id));
                self.finish_failed(&mut run, &e).await?;
                return Ok(run);
            }
        };
        let exec = ExecutionGraph::new(&graph);
        let Some(suspended_node) = exec.node(&state.node_id) else {
            let e = Error::Workflow(format!(
                "Suspended node '{}' is not part of the run graph",
                state.node_id
            ));
            self.finish_failed(&mut run, &e).await?;
            return Ok(run);
        };

        let payload = merge_resume_data(state.resume_context, data);

        run.status = RunStatus::Running;
        run.waiting_until = None;
        self.storage.save_run(&run).await?;
        metrics::record_resume();
        self.emit(RunEvent::RunResumed {
            run_id: run.id.clone(),
            node_id: state.node_id.clone(),
        });
        info!(node_id = %state.node_id, "Resuming run");

        let records = self.storage.get_node_runs(run_id).await?;
        let mut context = RunContextBuilder::new(&run, &graph).with_records(&graph, &records);
        context.record_output(suspended_node, &payload);

        let next = exec.next_node(&suspended_node.id, MAIN_PORT);
        self.drive(&mut run, &exec, next, payload, context).await?;
        Ok(run)
    }

    /// Retry a failed run as a new run with the same input and graph.
    #[instrument(name = "run.retry", skip_all, fields(run_id = %run_id))]
    pub async fn retry_run(&self, run_id: &str) -> Result<Run> {
        let parent = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        if parent.status != RunStatus::Failed {
            return Err(Error::NotRetryable {
                run_id: run_id.to_string(),
                reason: format!("status is {}", parent.status),
            });
        }
        if parent.retry_count >= self.max_retries {
            return Err(Error::NotRetryable {
                run_id: run_id.to_string(),
                reason: format!("retry limit of {} reached", self.max_retries),
            });
        }

        let graph = self.storage.get_run_graph(run_id).await?.ok_or_else(|| {
            Error::Workflow(format!("No graph snapshot stored for run {}", run_id))
        })?;
        let mut run = Run::new(
            &parent.workflow_id,
            &parent.workflow_name,
            RunMode::Retry,
            parent.input.clone(),
        );
        run.parent_run_id = Some(parent.id.clone());
        run.retry_count = parent.retry_count + 1;
        self.storage.save_run(&run).await?;
        self.storage.save_run_graph(&run.id, &graph).await?;

        info!(
            new_run_id = %run.id,
            attempt = run.retry_count,
            "Retrying failed run"
        );
        self.execute_run(run, &graph).await
    }

    /// Step from `start` and settle the run.
    async fn drive(
        &self,
        run: &mut Run,
        exec: &ExecutionGraph<'_>,
        start: Option<&WorkflowNode>,
        payload: Value,
        mut context: RunContextBuilder,
    ) -> Result<()> {
        let Some(start) = start else {
            return self.finish_success(run, payload).await;
        };

        metrics::inc_active_runs();
        let signal = self.cancellations.register(&run.id).await;
        let outcome = self
            .step(run, exec, start, payload, &mut context, &signal)
            .await;
        self.cancellations.unregister(&run.id).await;
        metrics::dec_active_runs();

        match outcome? {
            Outcome::Completed(output) => self.finish_success(run, output).await,
            Outcome::Suspended => Ok(()),
            Outcome::Failed(e) => self.finish_failed(run, &e).await,
        }
    }

    /// The step loop. Returns `Err` only for storage faults.
    async fn step(
        &self,
        run: &mut Run,
        exec: &ExecutionGraph<'_>,
        start: &WorkflowNode,
        mut payload: Value,
        context: &mut RunContextBuilder,
        cancel: &OnceLock<String>,
    ) -> Result<Outcome> {
        let mut current = start;

        for _ in 0..self.max_steps {
            if let Some(reason) = cancel.get() {
                return Ok(Outcome::Failed(Error::Cancelled(reason.clone())));
            }

            debug!(node_id = %current.id, node_type = %current.node_type, "Stepping");
            let mut record = NodeRunRecord {
                id: uuid::Uuid::new_v4().to_string(),
                run_id: run.id.clone(),
                node_id: current.id.clone(),
                node_name: current.display_name().to_string(),
                node_type: current.node_type.clone(),
                status: NodeRunStatus::Running,
                input: payload.clone(),
                output: None,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
                duration_ms: None,
            };
            self.storage.save_node_run(&record).await?;
            self.emit(RunEvent::NodeStarted {
                run_id: run.id.clone(),
                node_id: current.id.clone(),
                node_type: current.node_type.clone(),
            });

            let started = Instant::now();
            let result = self.invoker.invoke(current, &payload, context).await;
            record.finished_at = Some(Utc::now());
            record.duration_ms = Some(started.elapsed().as_millis() as i64);

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(node_id = %current.id, error = %e, "Node failed");
                    record.status = NodeRunStatus::Failed;
                    record.error = Some(e.to_string());
                    self.storage.save_node_run(&record).await?;
                    self.emit(RunEvent::NodeFailed {
                        run_id: run.id.clone(),
                        node_id: current.id.clone(),
                        error: e.to_string(),
                    });
                    return Ok(Outcome::Failed(e));
                }
            };

            record.status = NodeRunStatus::Success;
            record.output = Some(output.payload().clone());
            self.storage.save_node_run(&record).await?;
            self.emit(RunEvent::NodeSucceeded {
                run_id: run.id.clone(),
                node_id: current.id.clone(),
                duration_ms: record.duration_ms.unwrap_or_default(),
            });
            context.record_output(current, output.payload());

            let (port, data) = match output {
                NodeOutput::Suspend(request) => {
                    self.suspend(run, current, request).await?;
                    return Ok(Outcome::Suspended);
                }
                NodeOutput::Data(data) => (MAIN_PORT.to_string(), data),
                NodeOutput::Branch { port, data } => (port, data),
            };
            payload = data;

            match exec.next_node(&current.id, &port) {
                Some(next) => current = next,
                None => {
                    debug!(node_id = %current.id, port = %port, "No outgoing connection");
                    return Ok(Outcome::Completed(payload));
                }
            }
        }

        Ok(Outcome::Failed(Error::Workflow(format!(
            "Step limit of {} exceeded; the graph may contain a cycle",
            self.max_steps
        ))))
    }

    async fn suspend(&self, run: &mut Run, node: &WorkflowNode, request: SuspendRequest) -> Result<()> {
        let state = SuspendedState {
            run_id: run.id.clone(),
            node_id: node.id.clone(),
            wait_kind: request.wait_kind,
            wake_at: request.wake_at,
            resume_context: request.carry,
            condition: request.condition,
            created_at: Utc::now(),
        };

        run.status = RunStatus::Waiting;
        run.waiting_until = match request.wait_kind {
            WaitKind::Time => request.wake_at,
            _ => None,
        };
        self.storage.suspend_run(run, &state).await?;

        metrics::record_run("waiting", &run.mode.to_string());
        self.emit(RunEvent::RunWaiting {
            run_id: run.id.clone(),
            node_id: node.id.clone(),
            wait_kind: request.wait_kind.to_string(),
        });
        info!(
            node_id = %node.id,
            wait_kind = %request.wait_kind,
            wake_at = ?run.waiting_until,
            "Run suspended"
        );
        Ok(())
    }

    async fn finish_success(&self, run: &mut Run, output: Value) -> Result<()> {
        let now = Utc::now();
        run.status = RunStatus::Success;
        run.output = Some(output);
        run.error = None;
        run.error_trace = None;
        run.finished_at = Some(now);
        run.duration_ms = run.started_at.map(|s| (now - s).num_milliseconds());
        self.storage.save_run(run).await?;
        self.storage.increment_stats(&run.workflow_id, now).await?;

        metrics::record_run("success", &run.mode.to_string());
        self.emit(RunEvent::RunSucceeded {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            duration_ms: run.duration_ms.unwrap_or_default(),
        });
        info!(run_id = %run.id, duration_ms = ?run.duration_ms, "Run succeeded");
        Ok(())
    }

    async fn finish_failed(&self, run: &mut Run, e: &Error) -> Result<()> {
        let now = Utc::now();
        run.status = RunStatus::Failed;
        run.error = Some(e.to_string());
        run.error_trace = Some(e.trace());
        run.finished_at = Some(now);
        run.duration_ms = run.started_at.map(|s| (now - s).num_milliseconds());
        self.storage.save_run(run).await?;
        self.storage.increment_stats(&run.workflow_id, now).await?;

        metrics::record_run("failed", &run.mode.to_string());
        self.emit(RunEvent::RunFailed {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            error: e.to_string(),
        });
        error!(run_id = %run.id, error = %e, "Run failed");
        Ok(())
    }
}

/// Merge resume data over the suspended payload, key by key.
///
/// Non-object data replaces the payload unless it is `null`.
pub fn merge_resume_data(context: Value, data: Value) -> Value {
    match (context, data) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            base.extend(overrides);
            Value::Object(base)
        }
        (context, Value::Null) => context,
        (_, data) => data,
    }
}
