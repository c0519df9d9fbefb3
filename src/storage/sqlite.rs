//! SQLite storage implementation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::models::*;
use crate::error::{Error, Result};
use crate::workflow::WorkflowGraph;

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime_utc).transpose()
}

/// Fixed-width UTC timestamp so text comparison in SQL matches time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json_text(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn from_json_text(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

/// Default query limit.
const DEFAULT_QUERY_LIMIT: usize = 50;
/// Maximum query limit to prevent abuse.
const MAX_QUERY_LIMIT: usize = 1000;

const RUN_COLUMNS: &str = "id, workflow_id, workflow_name, status, mode, input, output, error, \
     error_trace, retry_count, parent_run_id, created_at, started_at, finished_at, \
     waiting_until, duration_ms";

const NODE_RUN_COLUMNS: &str = "id, run_id, node_id, node_name, node_type, status, input, \
     output, error, started_at, finished_at, duration_ms";

const SUSPENDED_COLUMNS: &str =
    "run_id, node_id, wait_kind, wake_at, resume_context, condition, created_at";

/// SQLite-based storage for runs, node records, suspended states and
/// workflow statistics.
#[derive(Clone)]
pub struct SqliteStorage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;

        // Initialize schema synchronously before wrapping in async mutex
        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> Result<()> {
        // WAL mode must be set before any transaction begins
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                mode TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                error_trace TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                parent_run_id TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                waiting_until TEXT,
                duration_ms INTEGER
            );

            CREATE TABLE IF NOT EXISTS run_graphs (
                run_id TEXT PRIMARY KEY,
                definition TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS node_runs (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS suspended_states (
                run_id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                wait_kind TEXT NOT NULL,
                wake_at TEXT,
                resume_context TEXT NOT NULL,
                condition TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS workflow_stats (
                workflow_id TEXT PRIMARY KEY,
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_executed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
            CREATE INDEX IF NOT EXISTS idx_node_runs_run ON node_runs(run_id);
            CREATE INDEX IF NOT EXISTS idx_suspended_wake ON suspended_states(wait_kind, wake_at);
            "#,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Insert or update a run.
    pub async fn save_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::upsert_run(&conn, run)
    }

    fn upsert_run(conn: &Connection, run: &Run) -> Result<()> {
        conn.execute(
            "INSERT INTO runs
             (id, workflow_id, workflow_name, status, mode, input, output, error, error_trace,
              retry_count, parent_run_id, created_at, started_at, finished_at, waiting_until, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                output = excluded.output,
                error = excluded.error,
                error_trace = excluded.error_trace,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                waiting_until = excluded.waiting_until,
                duration_ms = excluded.duration_ms",
            params![
                run.id,
                run.workflow_id,
                run.workflow_name,
                run.status.to_string(),
                run.mode.to_string(),
                to_json_text(&run.input),
                run.output.as_ref().map(to_json_text),
                run.error,
                run.error_trace,
                run.retry_count,
                run.parent_run_id,
                ts(&run.created_at),
                run.started_at.as_ref().map(ts),
                run.finished_at.as_ref().map(ts),
                run.waiting_until.as_ref().map(ts),
                run.duration_ms,
            ],
        )?;
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        let run = conn
            .query_row(&sql, [id], Self::row_to_run)
            .optional()?;
        Ok(run)
    }

    /// List recent runs, newest first.
    pub async fn list_runs(&self, workflow_id: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let limit = if limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            limit.min(MAX_QUERY_LIMIT)
        };

        let conn = self.conn.lock().await;
        let runs = match workflow_id {
            Some(workflow_id) => {
                let sql = format!(
                    "SELECT {} FROM runs WHERE workflow_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                    RUN_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![workflow_id, limit as i64], Self::row_to_run)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM runs ORDER BY created_at DESC LIMIT ?1",
                    RUN_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit as i64], Self::row_to_run)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(runs)
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
        let status_str: String = row.get(3)?;
        let mode_str: String = row.get(4)?;
        let input_str: String = row.get(5)?;
        let output_str: Option<String> = row.get(6)?;

        Ok(Run {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            workflow_name: row.get(2)?,
            status: status_str.parse().unwrap_or(RunStatus::Failed),
            mode: mode_str.parse().unwrap_or(RunMode::Manual),
            input: from_json_text(&input_str),
            output: output_str.map(|s| from_json_text(&s)),
            error: row.get(7)?,
            error_trace: row.get(8)?,
            retry_count: row.get(9)?,
            parent_run_id: row.get(10)?,
            created_at: parse_datetime_utc(&row.get::<_, String>(11)?)?,
            started_at: parse_optional_datetime(row.get(12)?)?,
            finished_at: parse_optional_datetime(row.get(13)?)?,
            waiting_until: parse_optional_datetime(row.get(14)?)?,
            duration_ms: row.get(15)?,
        })
    }

    /// Store the graph a run executes against.
    ///
    /// The snapshot is written once; later edits to the workflow definition
    /// never reach a run that already started.
    pub async fn save_run_graph(&self, run_id: &str, graph: &WorkflowGraph) -> Result<()> {
        let definition = serde_json::to_string(graph)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO run_graphs (run_id, definition) VALUES (?1, ?2)
             ON CONFLICT(run_id) DO NOTHING",
            params![run_id, definition],
        )?;
        Ok(())
    }

    /// Load the graph snapshot of a run.
    pub async fn get_run_graph(&self, run_id: &str) -> Result<Option<WorkflowGraph>> {
        let conn = self.conn.lock().await;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM run_graphs WHERE run_id = ?1",
                [run_id],
                |row| row.get(0),
            )
            .optional()?;

        definition
            .map(|d| {
                serde_json::from_str(&d)
                    .map_err(|e| Error::Storage(format!("Corrupt graph snapshot for {}: {}", run_id, e)))
            })
            .transpose()
    }

    // ------------------------------------------------------------------
    // Node run records
    // ------------------------------------------------------------------

    /// Insert or update a node run record.
    pub async fn save_node_run(&self, record: &NodeRunRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO node_runs
             (id, run_id, node_id, node_name, node_type, status, input, output, error,
              started_at, finished_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                output = excluded.output,
                error = excluded.error,
                finished_at = excluded.finished_at,
                duration_ms = excluded.duration_ms",
            params![
                record.id,
                record.run_id,
                record.node_id,
                record.node_name,
                record.node_type,
                record.status.to_string(),
                to_json_text(&record.input),
                record.output.as_ref().map(to_json_text),
                record.error,
                ts(&record.started_at),
                record.finished_at.as_ref().map(ts),
                record.duration_ms,
            ],
        )?;
        Ok(())
    }

    /// Node records of a run in execution order.
    pub async fn get_node_runs(&self, run_id: &str) -> Result<Vec<NodeRunRecord>> {
        let conn = self.conn.lock().await;
        Self::query_node_runs(&conn, run_id)
    }

    fn query_node_runs(conn: &Connection, run_id: &str) -> Result<Vec<NodeRunRecord>> {
        let sql = format!(
            "SELECT {} FROM node_runs WHERE run_id = ?1 ORDER BY started_at ASC, rowid ASC",
            NODE_RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([run_id], |row| {
                let status_str: String = row.get(5)?;
                let input_str: String = row.get(6)?;
                let output_str: Option<String> = row.get(7)?;

                Ok(NodeRunRecord {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    node_id: row.get(2)?,
                    node_name: row.get(3)?,
                    node_type: row.get(4)?,
                    status: status_str.parse().unwrap_or(NodeRunStatus::Failed),
                    input: from_json_text(&input_str),
                    output: output_str.map(|s| from_json_text(&s)),
                    error: row.get(8)?,
                    started_at: parse_datetime_utc(&row.get::<_, String>(9)?)?,
                    finished_at: parse_optional_datetime(row.get(10)?)?,
                    duration_ms: row.get(11)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Suspended states
    // ------------------------------------------------------------------

    /// Persist a suspension and the waiting run in one transaction.
    pub async fn suspend_run(&self, run: &Run, state: &SuspendedState) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        Self::upsert_run(&tx, run)?;
        Self::upsert_suspended(&tx, state)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert or replace the suspended state of a run.
    pub async fn save_suspended(&self, state: &SuspendedState) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::upsert_suspended(&conn, state)
    }

    fn upsert_suspended(conn: &Connection, state: &SuspendedState) -> Result<()> {
        conn.execute(
            "INSERT INTO suspended_states
             (run_id, node_id, wait_kind, wake_at, resume_context, condition, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(run_id) DO UPDATE SET
                node_id = excluded.node_id,
                wait_kind = excluded.wait_kind,
                wake_at = excluded.wake_at,
                resume_context = excluded.resume_context,
                condition = excluded.condition,
                created_at = excluded.created_at",
            params![
                state.run_id,
                state.node_id,
                state.wait_kind.to_string(),
                state.wake_at.as_ref().map(ts),
                to_json_text(&state.resume_context),
                state.condition,
                ts(&state.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get the suspended state of a run, if any.
    pub async fn get_suspended(&self, run_id: &str) -> Result<Option<SuspendedState>> {
        let conn = self.conn.lock().await;
        Self::query_suspended(&conn, run_id)
    }

    fn query_suspended(conn: &Connection, run_id: &str) -> Result<Option<SuspendedState>> {
        let sql = format!(
            "SELECT {} FROM suspended_states WHERE run_id = ?1",
            SUSPENDED_COLUMNS
        );
        let state = conn
            .query_row(&sql, [run_id], Self::row_to_suspended)
            .optional()?;
        Ok(state)
    }

    /// Remove and return the suspended state of a run.
    ///
    /// Select and delete happen in one transaction, so two concurrent
    /// callers can never both consume the same suspension.
    pub async fn take_suspended(&self, run_id: &str) -> Result<Option<SuspendedState>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let state = Self::query_suspended(&tx, run_id)?;
        if state.is_some() {
            tx.execute("DELETE FROM suspended_states WHERE run_id = ?1", [run_id])?;
        }
        tx.commit()?;
        Ok(state)
    }

    /// Delete the suspended state of a run.
    pub async fn delete_suspended(&self, run_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM suspended_states WHERE run_id = ?1", [run_id])?;
        Ok(())
    }

    /// Time-based suspensions whose wake time has passed, oldest first.
    pub async fn due_suspended(&self, now: DateTime<Utc>) -> Result<Vec<SuspendedState>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM suspended_states
             WHERE wait_kind = 'time' AND wake_at IS NOT NULL AND wake_at <= ?1
             ORDER BY wake_at ASC",
            SUSPENDED_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let states = stmt
            .query_map([ts(&now)], Self::row_to_suspended)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn row_to_suspended(row: &rusqlite::Row<'_>) -> rusqlite::Result<SuspendedState> {
        let kind_str: String = row.get(2)?;
        let context_str: String = row.get(4)?;

        Ok(SuspendedState {
            run_id: row.get(0)?,
            node_id: row.get(1)?,
            wait_kind: kind_str.parse().unwrap_or(WaitKind::ExternalEvent),
            wake_at: parse_optional_datetime(row.get(3)?)?,
            resume_context: from_json_text(&context_str),
            condition: row.get(5)?,
            created_at: parse_datetime_utc(&row.get::<_, String>(6)?)?,
        })
    }

    /// Run with its node records and pending suspension.
    pub async fn get_run_trace(&self, run_id: &str) -> Result<Option<RunTrace>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        let Some(run) = conn
            .query_row(&sql, [run_id], Self::row_to_run)
            .optional()?
        else {
            return Ok(None);
        };

        let nodes = Self::query_node_runs(&conn, run_id)?;
        let suspended = Self::query_suspended(&conn, run_id)?;
        Ok(Some(RunTrace {
            run,
            nodes,
            suspended,
        }))
    }

    // ------------------------------------------------------------------
    // Workflow statistics
    // ------------------------------------------------------------------

    /// Atomically bump a workflow's execution counter.
    pub async fn increment_stats(&self, workflow_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_stats (workflow_id, execution_count, last_executed_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(workflow_id) DO UPDATE SET
                execution_count = execution_count + 1,
                last_executed_at = excluded.last_executed_at",
            params![workflow_id, ts(&at)],
        )?;
        Ok(())
    }

    /// Statistics for a workflow (zeroed when it never ran).
    pub async fn get_stats(&self, workflow_id: &str) -> Result<WorkflowStats> {
        let conn = self.conn.lock().await;
        let stats = conn
            .query_row(
                "SELECT execution_count, last_executed_at FROM workflow_stats WHERE workflow_id = ?1",
                [workflow_id],
                |row| {
                    let count: i64 = row.get(0)?;
                    Ok(WorkflowStats {
                        workflow_id: workflow_id.to_string(),
                        execution_count: count.max(0) as u64,
                        last_executed_at: parse_optional_datetime(row.get(1)?)?,
                    })
                },
            )
            .optional()?;

        Ok(stats.unwrap_or_else(|| WorkflowStats {
            workflow_id: workflow_id.to_string(),
            execution_count: 0,
            last_executed_at: None,
        }))
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Delete old runs together with their records.
    ///
    /// Non-failed runs older than `retention_days` go first; failed runs are
    /// kept three times as long. Waiting runs are never removed.
    pub async fn cleanup_runs(&self, retention_days: u32, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let failed_cutoff = now - Duration::days(i64::from(retention_days) * 3);

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let runs_deleted = tx.execute(
            "DELETE FROM runs WHERE status NOT IN ('failed', 'waiting') AND created_at < ?1",
            [ts(&cutoff)],
        )?;
        let failed_runs_deleted = tx.execute(
            "DELETE FROM runs WHERE status = 'failed' AND created_at < ?1",
            [ts(&failed_cutoff)],
        )?;
        tx.commit()?;

        Ok(CleanupReport {
            runs_deleted: runs_deleted as u64,
            failed_runs_deleted: failed_runs_deleted as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_at(status: RunStatus, days_ago: i64) -> Run {
        let mut run = Run::new("wf-1", "demo", RunMode::Manual, json!({"k": 1}));
        run.status = status;
        run.created_at = Utc::now() - Duration::days(days_ago);
        run
    }

    fn node_record(run_id: &str, node_id: &str) -> NodeRunRecord {
        NodeRunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            node_name: node_id.to_string(),
            node_type: "set".to_string(),
            status: NodeRunStatus::Success,
            input: json!({}),
            output: Some(json!({"ok": true})),
            error: None,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            duration_ms: Some(3),
        }
    }

    fn suspended(run_id: &str, wake_at: Option<DateTime<Utc>>) -> SuspendedState {
        SuspendedState {
            run_id: run_id.to_string(),
            node_id: "wait".to_string(),
            wait_kind: if wake_at.is_some() {
                WaitKind::Time
            } else {
                WaitKind::ExternalEvent
            },
            wake_at,
            resume_context: json!({"a": 1}),
            condition: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_run_crud() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let mut run = Run::new("wf-1", "demo", RunMode::Webhook, json!({"key": "value"}));
        storage.save_run(&run).await.unwrap();

        run.status = RunStatus::Success;
        run.output = Some(json!({"result": "ok"}));
        run.finished_at = Some(Utc::now());
        run.duration_ms = Some(12);
        storage.save_run(&run).await.unwrap();

        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.mode, RunMode::Webhook);
        assert_eq!(loaded.input, json!({"key": "value"}));
        assert_eq!(loaded.output, Some(json!({"result": "ok"})));
        assert_eq!(loaded.duration_ms, Some(12));

        assert!(storage.get_run("missing").await.unwrap().is_none());
        assert_eq!(storage.list_runs(Some("wf-1"), 10).await.unwrap().len(), 1);
        assert!(storage.list_runs(Some("other"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_runs_in_order() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let run = run_at(RunStatus::Running, 0);
        storage.save_run(&run).await.unwrap();

        storage.save_node_run(&node_record(&run.id, "first")).await.unwrap();
        storage.save_node_run(&node_record(&run.id, "second")).await.unwrap();

        let records = storage.get_node_runs(&run.id).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_take_suspended_consumes_once() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut run = run_at(RunStatus::Waiting, 0);
        run.waiting_until = None;
        storage.suspend_run(&run, &suspended(&run.id, None)).await.unwrap();

        let first = storage.take_suspended(&run.id).await.unwrap();
        assert_eq!(first.unwrap().resume_context, json!({"a": 1}));
        assert!(storage.take_suspended(&run.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_suspended_only_returns_elapsed_time_waits() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();

        let due = run_at(RunStatus::Waiting, 0);
        let later = run_at(RunStatus::Waiting, 0);
        let event = run_at(RunStatus::Waiting, 0);
        for run in [&due, &later, &event] {
            storage.save_run(run).await.unwrap();
        }
        storage
            .save_suspended(&suspended(&due.id, Some(now - Duration::seconds(5))))
            .await
            .unwrap();
        storage
            .save_suspended(&suspended(&later.id, Some(now + Duration::hours(1))))
            .await
            .unwrap();
        storage.save_suspended(&suspended(&event.id, None)).await.unwrap();

        let states = storage.due_suspended(now).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].run_id, due.id);
    }

    #[tokio::test]
    async fn test_stats_increment() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.get_stats("wf-1").await.unwrap().execution_count, 0);

        storage.increment_stats("wf-1", Utc::now()).await.unwrap();
        storage.increment_stats("wf-1", Utc::now()).await.unwrap();

        let stats = storage.get_stats("wf-1").await.unwrap();
        assert_eq!(stats.execution_count, 2);
        assert!(stats.last_executed_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_stats_increments_are_not_lost() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.increment_stats("wf-c", Utc::now()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(storage.get_stats("wf-c").await.unwrap().execution_count, 20);
    }

    #[tokio::test]
    async fn test_cleanup_retention() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let old_success = run_at(RunStatus::Success, 40);
        let fresh_success = run_at(RunStatus::Success, 2);
        let old_failed = run_at(RunStatus::Failed, 40);
        let ancient_failed = run_at(RunStatus::Failed, 100);
        let old_waiting = run_at(RunStatus::Waiting, 40);
        for run in [&old_success, &fresh_success, &old_failed, &ancient_failed, &old_waiting] {
            storage.save_run(run).await.unwrap();
        }
        storage
            .save_node_run(&node_record(&old_success.id, "n1"))
            .await
            .unwrap();

        let report = storage.cleanup_runs(30, Utc::now()).await.unwrap();
        assert_eq!(report.runs_deleted, 1);
        assert_eq!(report.failed_runs_deleted, 1);

        assert!(storage.get_run(&old_success.id).await.unwrap().is_none());
        assert!(storage.get_node_runs(&old_success.id).await.unwrap().is_empty());
        assert!(storage.get_run(&fresh_success.id).await.unwrap().is_some());
        assert!(storage.get_run(&old_failed.id).await.unwrap().is_some());
        assert!(storage.get_run(&ancient_failed.id).await.unwrap().is_none());
        assert!(storage.get_run(&old_waiting.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_graph_snapshot() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let run = run_at(RunStatus::Running, 0);
        storage.save_run(&run).await.unwrap();

        let graph = crate::workflow::parse_workflow(
            "name: snap\nnodes:\n  - { id: t, type: manual_trigger }\n",
        )
        .unwrap();
        storage.save_run_graph(&run.id, &graph).await.unwrap();

        let loaded = storage.get_run_graph(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, graph);
    }

    #[tokio::test]
    async fn test_wal_mode_for_file_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        let storage = SqliteStorage::open(&db_path).unwrap();

        let conn = storage.conn.lock().await;
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
