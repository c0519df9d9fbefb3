//! Waiting-run poller.
//!
//! Resumes runs suspended on a time-based wait once their wake time passes.
//! Event and condition waits are left to their external deliverers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::engine::Executor;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownCoordinator;

/// Default poll interval (in milliseconds).
const POLL_INTERVAL_MS: u64 = 1000;

pub struct WaitPoller {
    executor: Arc<Executor>,
    poll_interval_ms: u64,
}

impl WaitPoller {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }

    /// Set custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    /// Resume every time wait due at `now`. Returns the number resumed.
    ///
    /// A run that another caller resumed first is skipped.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.executor.storage().due_suspended(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut resumed = 0;
        for state in due {
            let waited = (now - state.created_at).num_seconds();
            match self
                .executor
                .resume_run(&state.run_id, Value::Object(Map::new()))
                .await
            {
                Ok(run) => {
                    info!(
                        run_id = %run.id,
                        status = %run.status,
                        waited_secs = waited,
                        "Resumed waiting run"
                    );
                    resumed += 1;
                }
                Err(Error::NotWaiting(run_id)) => {
                    debug!(run_id = %run_id, "Run already resumed elsewhere");
                }
                Err(e) => {
                    error!(run_id = %state.run_id, "Failed to resume waiting run: {}", e);
                }
            }
        }

        if resumed > 0 {
            debug!("Resumed {} waiting run(s)", resumed);
        }
        Ok(resumed)
    }

    /// Poll until shutdown is requested.
    pub async fn run(&self, shutdown: ShutdownCoordinator) {
        let mut ticker = interval(Duration::from_millis(self.poll_interval_ms));
        info!(
            "Wait poller started with {}ms poll interval",
            self.poll_interval_ms
        );

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => {
                    info!("Wait poller received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_due(Utc::now()).await {
                        warn!("Error processing waiting runs: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::nodes::NodeRegistry;
    use crate::storage::{RunMode, RunStatus, SqliteStorage};
    use crate::workflow::parse_workflow;
    use serde_json::json;

    fn executor() -> Arc<Executor> {
        Arc::new(Executor::new(
            Arc::new(NodeRegistry::new()),
            SqliteStorage::open_in_memory().unwrap(),
            Arc::new(StaticCredentials::new()),
        ))
    }

    const TIMED: &str = r#"
name: timed
nodes:
  - { id: start, type: manual_trigger }
  - id: pause
    type: wait
    parameters: { wait_type: time, amount: 2, unit: minutes }
  - id: after
    type: set
    parameters:
      values: [{ name: woke, setTo: "yes" }]
connections:
  - { source: start, target: pause }
  - { source: pause, target: after }
"#;

    #[tokio::test]
    async fn test_resumes_only_due_time_waits() {
        let executor = executor();
        let poller = WaitPoller::new(executor.clone());

        let timed = executor
            .start_run(&parse_workflow(TIMED).unwrap(), json!({"n": 1}), RunMode::Manual)
            .await
            .unwrap();
        let event = executor
            .start_run(
                &parse_workflow(&TIMED.replace("{ wait_type: time, amount: 2, unit: minutes }", "{ wait_type: webhook }")).unwrap(),
                json!({}),
                RunMode::Manual,
            )
            .await
            .unwrap();
        assert_eq!(timed.status, RunStatus::Waiting);
        assert_eq!(event.status, RunStatus::Waiting);

        assert_eq!(poller.process_due(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::minutes(3);
        assert_eq!(poller.process_due(later).await.unwrap(), 1);

        let run = executor.storage().get_run(&timed.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output.unwrap(), json!({"n": 1, "woke": "yes"}));

        let untouched = executor.storage().get_run(&event.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, RunStatus::Waiting);

        assert_eq!(poller.process_due(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let poller = WaitPoller::new(executor()).with_poll_interval(10);
        let shutdown = ShutdownCoordinator::new();
        let stopper = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.request_shutdown();
        });

        let result = tokio::time::timeout(Duration::from_secs(1), poller.run(shutdown)).await;
        assert!(result.is_ok());
    }
}
