//! The long-running worker loop.
//!
//! One cycle: replay the offline queue, poll for work, execute each task in
//! order, report each result, sleep. Connectivity failures back off with a
//! capped delay; everything else is absorbed and logged. Only the
//! cancellation token ends the loop.

use std::cmp;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiOutcome, ResilientClient, Transport};
use crate::error::Error;
use crate::queue::OfflineQueue;
use crate::tasks::{Executor, PollResponse};
use crate::worker::LivenessRegistry;

/// Endpoint polled for new tasks and messages.
pub const POLL_ENDPOINT: &str = "agent-task-queue";

/// Endpoint receiving task results.
pub const RESULT_ENDPOINT: &str = "agent-task-result";

/// Ceiling on the backoff delay between failed polls.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Pause after an unexpected error before the loop resumes.
const RECOVERY_PAUSE: Duration = Duration::from_secs(5);

/// Consecutive failures before the unreachable-backend log line.
const QUIET_FAILURES: u32 = 5;

/// Phase of the worker loop, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Polling,
    Executing,
    Idle,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Polling => "polling",
            WorkerState::Executing => "executing",
            WorkerState::Idle => "idle",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// The identity-scoped worker: polls, executes, reports.
pub struct Worker {
    identity: String,
    poll_interval: Duration,
    transport: Arc<dyn Transport>,
    reporter: ResilientClient,
    executor: Executor,
    liveness: LivenessRegistry,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        identity: impl Into<String>,
        transport: Arc<dyn Transport>,
        queue: OfflineQueue,
        executor: Executor,
        liveness: LivenessRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity: identity.into(),
            poll_interval: Duration::from_secs(5),
            reporter: ResilientClient::new(transport.clone(), queue),
            transport,
            executor,
            liveness,
            cancel,
        }
    }

    /// Set the delay between poll cycles.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until cancelled. The liveness marker brackets the whole run and
    /// is released no matter how the loop ends.
    pub async fn run(&self) -> Result<(), Error> {
        debug!(state = %WorkerState::Starting, identity = %self.identity, "Worker state");
        self.liveness.register(&self.identity)?;
        info!(
            identity = %self.identity,
            pid = std::process::id(),
            interval_secs = self.poll_interval.as_secs(),
            "Worker started"
        );

        self.run_loop().await;

        debug!(state = %WorkerState::Stopping, identity = %self.identity, "Worker state");
        self.liveness.unregister(&self.identity);
        debug!(state = %WorkerState::Stopped, identity = %self.identity, "Worker state");
        info!(identity = %self.identity, "Worker stopped");
        Ok(())
    }

    async fn run_loop(&self) {
        let mut consecutive_failures: u32 = 0;

        while !self.cancel.is_cancelled() {
            if let Err(e) = self.poll_cycle(&mut consecutive_failures).await {
                // Whatever went wrong, the loop survives it.
                error!(error = %e, "Worker cycle failed");
                self.sleep(RECOVERY_PAUSE).await;
            }
        }
    }

    /// One poll cycle: drain, poll, execute, report, sleep.
    async fn poll_cycle(&self, consecutive_failures: &mut u32) -> Result<(), Error> {
        // Replay anything that failed to deliver earlier.
        let report = self.reporter.drain().await;
        if report.drained > 0 || report.halted {
            debug!(
                drained = report.drained,
                kept = report.kept,
                halted = report.halted,
                "Queue replay attempted"
            );
        }

        debug!(state = %WorkerState::Polling, "Worker state");
        let body = match self
            .transport
            .call(POLL_ENDPOINT, Some(&json!({})), "POST")
            .await
        {
            ApiOutcome::Success(body) => {
                *consecutive_failures = 0;
                body
            }
            ApiOutcome::Connectivity(reason) => {
                *consecutive_failures += 1;
                if *consecutive_failures > QUIET_FAILURES {
                    info!(%reason, "Backend unreachable, retrying");
                }
                self.sleep(backoff_delay(self.poll_interval, *consecutive_failures))
                    .await;
                return Ok(());
            }
            ApiOutcome::ServerError { status, body }
            | ApiOutcome::ClientError { status, body } => {
                warn!(status, body = %body, "Poll rejected");
                self.sleep(self.poll_interval).await;
                return Ok(());
            }
        };

        let response: PollResponse = serde_json::from_value(body).unwrap_or_default();

        if !response.tasks.is_empty() {
            debug!(state = %WorkerState::Executing, "Worker state");
            info!(count = response.tasks.len(), "Received tasks");
        }
        for task in &response.tasks {
            let result = self.executor.execute(task).await;
            info!(task_id = %task.id, status = %result.status, "Task finished");

            // A failed report lands in the offline queue; the next task is
            // attempted regardless.
            self.reporter
                .request(RESULT_ENDPOINT, Some(result.report_body(&task.id)), "POST")
                .await;
        }

        for msg in &response.messages {
            info!(from = %msg.from_agent_id, content = %msg.content, "Message received");
        }

        debug!(state = %WorkerState::Idle, "Worker state");
        self.sleep(self.poll_interval).await;
        Ok(())
    }

    /// Sleep that wakes early on cancellation.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Backoff grows linearly with consecutive failures, capped.
fn backoff_delay(poll_interval: Duration, consecutive_failures: u32) -> Duration {
    cmp::min(poll_interval * consecutive_failures, BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::queue::{MemoryStore, QueueStore};

    #[test]
    fn backoff_grows_with_failures_up_to_the_cap() {
        let interval = Duration::from_secs(5);
        assert_eq!(backoff_delay(interval, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(interval, 3), Duration::from_secs(15));
        assert_eq!(backoff_delay(interval, 12), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, 1000), Duration::from_secs(60));
    }

    #[test]
    fn worker_states_display_for_logs() {
        assert_eq!(WorkerState::Starting.to_string(), "starting");
        assert_eq!(WorkerState::Idle.to_string(), "idle");
        assert_eq!(WorkerState::Stopped.to_string(), "stopped");
    }

    /// Backend fake for end-to-end loop runs: first poll returns two tasks,
    /// reports for `t1` always hit a dead network, and the second poll
    /// cancels the worker.
    struct FakeBackend {
        polls: AtomicUsize,
        reports: Mutex<Vec<Value>>,
        cancel: CancellationToken,
    }

    impl FakeBackend {
        fn new(cancel: CancellationToken) -> Self {
            Self {
                polls: AtomicUsize::new(0),
                reports: Mutex::new(Vec::new()),
                cancel,
            }
        }

        fn reported_task_ids(&self) -> Vec<String> {
            self.reports
                .lock()
                .unwrap()
                .iter()
                .map(|r| r["task_id"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeBackend {
        async fn call(
            &self,
            endpoint: &str,
            payload: Option<&Value>,
            _method: &str,
        ) -> ApiOutcome {
            match endpoint {
                POLL_ENDPOINT => {
                    let n = self.polls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        ApiOutcome::Success(json!({
                            "tasks": [
                                {"id": "t1", "action_type": "noop", "action_description": "first"},
                                {"id": "t2", "action_type": "noop", "action_description": "second"},
                            ],
                            "messages": [
                                {"from_agent_id": "peer", "content": "hello"}
                            ]
                        }))
                    } else {
                        self.cancel.cancel();
                        ApiOutcome::Connectivity("backend gone".into())
                    }
                }
                RESULT_ENDPOINT => {
                    let report = payload.cloned().unwrap_or_default();
                    let is_first_task = report["task_id"] == "t1";
                    self.reports.lock().unwrap().push(report);
                    if is_first_task {
                        ApiOutcome::Connectivity("connection reset".into())
                    } else {
                        ApiOutcome::Success(json!({}))
                    }
                }
                other => panic!("unexpected endpoint {other}"),
            }
        }
    }

    #[tokio::test]
    async fn loop_reports_tasks_in_order_and_queues_failed_reports() {
        let cancel = CancellationToken::new();
        let backend = Arc::new(FakeBackend::new(cancel.clone()));
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(store.clone());

        let dir = tempfile::tempdir().unwrap();
        let worker = Worker::new(
            "agent-e2e",
            backend.clone(),
            queue,
            Executor::new(),
            LivenessRegistry::new(dir.path()),
            cancel,
        )
        .with_poll_interval(Duration::from_millis(1));

        worker.run().await.unwrap();

        // Both results were attempted, in the order the tasks arrived; the
        // failed first report was retried once by the second cycle's drain.
        let ids = backend.reported_task_ids();
        assert_eq!(ids, vec!["t1", "t2", "t1"]);

        // t1's report is still queued: the replay hit the dead network too.
        let queued = store.load().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].endpoint, RESULT_ENDPOINT);
        assert_eq!(queued[0].payload["task_id"], "t1");

        // The liveness marker is gone after the loop ends.
        assert!(!dir.path().join("agent-e2e.pid").exists());
    }

    #[tokio::test]
    async fn run_refuses_a_second_worker_for_the_same_identity() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let backend = Arc::new(FakeBackend::new(cancel.clone()));
        let dir = tempfile::tempdir().unwrap();

        let liveness = LivenessRegistry::new(dir.path());
        liveness.register("agent-dup").unwrap();

        let worker = Worker::new(
            "agent-dup",
            backend,
            OfflineQueue::new(Arc::new(MemoryStore::new())),
            Executor::new(),
            LivenessRegistry::new(dir.path()),
            cancel,
        );

        assert!(worker.run().await.is_err());
        // The first registration is untouched.
        assert!(dir.path().join("agent-dup.pid").exists());
    }
}
